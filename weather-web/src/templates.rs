//! HTML pages. Every interpolated value goes through [`escape`].

use weather_core::WeatherReport;

pub const DEFAULT_ERROR: &str = "An error occured";

pub fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n\
         <html lang=\"en\">\n\
         <head>\n\
         <meta charset=\"utf-8\">\n\
         <title>{}</title>\n\
         </head>\n\
         <body>\n\
         {body}\n\
         </body>\n\
         </html>\n",
        escape(title)
    )
}

pub fn index() -> String {
    layout(
        "Weather Lookup",
        "<h1>Weather Lookup</h1>\n\
         <form action=\"/location\" method=\"post\">\n\
         <label for=\"location\">Location</label>\n\
         <input type=\"text\" id=\"location\" name=\"location\" required>\n\
         <button type=\"submit\">Get weather</button>\n\
         </form>",
    )
}

pub fn weather(report: &WeatherReport) -> String {
    let observed = report
        .observed_at
        .map(|at| {
            format!(
                "<p>Observed at {}</p>\n",
                escape(&at.format("%Y-%m-%d %H:%M UTC").to_string())
            )
        })
        .unwrap_or_default();

    let body = format!(
        "<h1>Weather in {location}</h1>\n\
         <ul>\n\
         <li>Forecast: {forecast}</li>\n\
         <li>Feels like: {temp} &deg;C</li>\n\
         <li>Wind speed: {wind} m/s</li>\n\
         <li>Cloudiness: {clouds}%</li>\n\
         </ul>\n\
         {observed}\
         <a href=\"/\">Look up another location</a>",
        location = escape(&report.location),
        forecast = escape(&report.forecast),
        temp = escape(&report.temp),
        wind = escape(&report.wind_speed),
        clouds = escape(&report.clouds),
    );
    layout(&format!("Weather in {}", report.location), &body)
}

pub fn error(message: &str) -> String {
    let body = format!(
        "<h1>Something went wrong</h1>\n\
         <p class=\"error\">{}</p>\n\
         <a href=\"/\">Back</a>",
        escape(message)
    );
    layout("Error", &body)
}
