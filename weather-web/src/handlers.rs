//! Route handlers. None of them return an error: every failure ends in a
//! redirect to `/error` carrying a user-facing message.

use std::fmt::Display;

use axum::{
    Form,
    extract::{
        Path, Query, State,
        rejection::{FormRejection, PathRejection, QueryRejection},
    },
    http::{HeaderMap, header},
    response::{Html, IntoResponse, Redirect, Response},
};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use weather_core::{Coordinates, Pipeline, WeatherError};

use crate::{
    server::AppState,
    session::token_from_headers,
    templates::{self, DEFAULT_ERROR},
};

const INVALID_COORDINATES: &str = "Invalid coordinates";

#[derive(Debug, Deserialize)]
pub struct LocationForm {
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CoordinatesQuery {
    lat: f64,
    lon: f64,
}

impl CoordinatesQuery {
    fn validated(&self) -> Option<Coordinates> {
        let lat_ok = self.lat.is_finite() && (-90.0..=90.0).contains(&self.lat);
        let lon_ok = self.lon.is_finite() && (-180.0..=180.0).contains(&self.lon);
        (lat_ok && lon_ok).then_some(Coordinates {
            lat: self.lat,
            lon: self.lon,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ErrorQuery {
    message: Option<String>,
}

fn redirect_to_error(message: impl Display) -> Response {
    let message = message.to_string();
    let target = format!(
        "/error?message={}",
        utf8_percent_encode(&message, NON_ALPHANUMERIC)
    );
    Redirect::to(&target).into_response()
}

fn lookup_failed(err: WeatherError) -> Response {
    redirect_to_error(err)
}

pub async fn index() -> Html<String> {
    Html(templates::index())
}

pub async fn submit_location(form: Result<Form<LocationForm>, FormRejection>) -> Response {
    let raw = match form {
        Ok(Form(form)) => form.location,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "location form rejected");
            None
        }
    };

    match Pipeline::receive_location(raw.as_deref()) {
        Ok(query) => {
            let target = format!(
                "/geo_data/{}",
                utf8_percent_encode(query.as_str(), NON_ALPHANUMERIC)
            );
            Redirect::to(&target).into_response()
        }
        Err(err) => lookup_failed(err),
    }
}

pub async fn geo_data(
    State(state): State<AppState>,
    location_name: Result<Path<String>, PathRejection>,
) -> Response {
    let raw = location_name.ok().map(|Path(name)| name);

    let query = match Pipeline::receive_location(raw.as_deref()) {
        Ok(query) => query,
        Err(err) => return lookup_failed(err),
    };

    match state.pipeline.geocode(&query).await {
        Ok(at) => Redirect::to(&format!("/get_weather?lat={}&lon={}", at.lat, at.lon)).into_response(),
        Err(err) => lookup_failed(err),
    }
}

pub async fn get_weather(
    State(state): State<AppState>,
    query: Result<Query<CoordinatesQuery>, QueryRejection>,
) -> Response {
    let Some(at) = query.ok().and_then(|Query(q)| q.validated()) else {
        tracing::warn!("rejected weather request with invalid coordinates");
        return redirect_to_error(INVALID_COORDINATES);
    };

    let snapshot = match state.pipeline.fetch_weather(at).await {
        Ok(snapshot) => snapshot,
        Err(err) => return lookup_failed(err),
    };

    if let Err(err) = state.pipeline.persist(&snapshot).await {
        return lookup_failed(err);
    }

    let token = state.sessions.insert(snapshot);
    (
        [(header::SET_COOKIE, state.sessions.cookie(&token))],
        Redirect::to("/get_weather_for_user"),
    )
        .into_response()
}

pub async fn get_weather_for_user(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let snapshot = token_from_headers(&headers).and_then(|token| state.sessions.get(&token));

    match Pipeline::present(snapshot.as_ref()) {
        Ok(report) => Html(templates::weather(&report)).into_response(),
        Err(err) => redirect_to_error(err),
    }
}

pub async fn error_page(query: Result<Query<ErrorQuery>, QueryRejection>) -> Html<String> {
    let message = query
        .ok()
        .and_then(|Query(q)| q.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| DEFAULT_ERROR.to_string());
    Html(templates::error(&message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{server::router, session::SessionStore};
    use async_trait::async_trait;
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use serde_json::{Value, json};
    use std::{sync::Arc, time::Duration};
    use tower::ServiceExt;
    use weather_core::{
        Geocoder, LocationQuery, UpstreamService, WeatherProvider, WeatherSink, WeatherSnapshot,
        provider::openweather::OpenWeatherClient,
    };
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    #[derive(Debug)]
    struct FakeGeocoder;

    #[async_trait]
    impl Geocoder for FakeGeocoder {
        async fn geocode(&self, query: &LocationQuery) -> Result<Coordinates, WeatherError> {
            match query.as_str() {
                "Nowhere" => Err(WeatherError::NoMatch(query.to_string())),
                "Down" => Err(WeatherError::upstream(
                    UpstreamService::Geocoding,
                    "request timed out",
                )),
                _ => Ok(Coordinates {
                    lat: 51.5,
                    lon: -0.12,
                }),
            }
        }
    }

    #[derive(Debug)]
    struct FakeWeather(Value);

    #[async_trait]
    impl WeatherProvider for FakeWeather {
        async fn current_weather(&self, _at: Coordinates) -> Result<WeatherSnapshot, WeatherError> {
            Ok(WeatherSnapshot::from_value(self.0.clone()))
        }
    }

    #[derive(Debug)]
    struct UnreachableWeather;

    #[async_trait]
    impl WeatherProvider for UnreachableWeather {
        async fn current_weather(&self, _at: Coordinates) -> Result<WeatherSnapshot, WeatherError> {
            Err(WeatherError::upstream(
                UpstreamService::Weather,
                "status 503 Service Unavailable",
            ))
        }
    }

    #[derive(Debug)]
    struct FakeSink {
        outage: bool,
    }

    #[async_trait]
    impl WeatherSink for FakeSink {
        async fn persist(&self, snapshot: &WeatherSnapshot) -> Result<(), WeatherError> {
            if self.outage {
                return Err(WeatherError::persistence("bucket unreachable"));
            }
            // Same validation the direct-write store applies.
            let report = snapshot.report()?;
            weather_core::PersistedWeatherRecord::try_from(&report)?;
            Ok(())
        }
    }

    fn test_payload() -> Value {
        json!({
            "clouds": { "all": 75 },
            "weather": [{ "description": "clear sky" }],
            "wind": { "speed": 5.5 },
            "name": "TestLocation",
            "main": { "feels_like": 300 }
        })
    }

    fn app_from(pipeline: Pipeline) -> Router {
        let sessions = SessionStore::new("test-secret", Duration::from_secs(60)).unwrap();
        router(AppState::new(pipeline, sessions))
    }

    fn app_with(payload: Value, outage: bool) -> Router {
        app_from(Pipeline::new(
            Arc::new(FakeGeocoder),
            Arc::new(FakeWeather(payload)),
            Arc::new(FakeSink { outage }),
        ))
    }

    fn app() -> Router {
        app_with(test_payload(), false)
    }

    async fn send(app: &Router, request: Request<Body>) -> Response {
        app.clone().oneshot(request).await.unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_form(uri: &str, body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap()
    }

    fn location(response: &Response) -> &str {
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn cookie_pair(response: &Response) -> String {
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    #[tokio::test]
    async fn index_renders_the_form() {
        let response = send(&app(), get("/")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("<h1>Weather Lookup</h1>"));
    }

    #[tokio::test]
    async fn location_redirects_to_geocoding() {
        let app = app();

        let response = send(&app, post_form("/location", "location=Paris")).await;
        assert_eq!(location(&response), "/geo_data/Paris");

        let response = send(&app, post_form("/location", "location=New+York")).await;
        assert_eq!(location(&response), "/geo_data/New%20York");
    }

    #[tokio::test]
    async fn empty_or_missing_location_redirects_to_error() {
        let app = app();
        let expected = "/error?message=Error%20parsing%20geolocation%20data%2E";

        let response = send(&app, post_form("/location", "location=")).await;
        assert_eq!(location(&response), expected);

        let response = send(&app, post_form("/location", "")).await;
        assert_eq!(location(&response), expected);

        let request = Request::builder()
            .method("POST")
            .uri("/location")
            .body(Body::empty())
            .unwrap();
        let response = send(&app, request).await;
        assert_eq!(location(&response), expected);
    }

    #[tokio::test]
    async fn geo_data_redirects_with_coordinates() {
        let response = send(&app(), get("/geo_data/London")).await;
        assert_eq!(location(&response), "/get_weather?lat=51.5&lon=-0.12");
    }

    #[tokio::test]
    async fn geo_data_without_match_redirects_to_error() {
        let response = send(&app(), get("/geo_data/Nowhere")).await;
        assert_eq!(
            location(&response),
            "/error?message=No%20location%20found%20matching%20%27Nowhere%27"
        );
    }

    #[tokio::test]
    async fn geocoding_timeout_text_reaches_the_error_page() {
        let response = send(&app(), get("/geo_data/Down")).await;
        assert_eq!(
            location(&response),
            "/error?message=Request%20to%20Geocoding%20API%20failed%3A%20request%20timed%20out"
        );
    }

    #[tokio::test]
    async fn upstream_status_is_shown_but_its_body_is_not() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/geo/1.0/direct"))
            .respond_with(
                ResponseTemplate::new(401).set_body_string("Invalid API key. See our FAQ."),
            )
            .mount(&server)
            .await;

        let client = Arc::new(
            OpenWeatherClient::new("TEST_KEY".into(), Duration::from_secs(5))
                .unwrap()
                .with_base_url(&server.uri()),
        );
        let app = app_from(Pipeline::new(
            client.clone(),
            client,
            Arc::new(FakeSink { outage: false }),
        ));

        let response = send(&app, get("/geo_data/London")).await;
        let target = location(&response);

        assert!(target.contains("status%20401%20Unauthorized"), "{target}");
        assert!(!target.contains("Invalid"), "{target}");
        assert!(!target.contains("FAQ"), "{target}");
        assert!(!target.contains("TEST_KEY"), "{target}");
    }

    #[tokio::test]
    async fn weather_fetch_failure_redirects_without_a_session() {
        let app = app_from(Pipeline::new(
            Arc::new(FakeGeocoder),
            Arc::new(UnreachableWeather),
            Arc::new(FakeSink { outage: false }),
        ));

        let response = send(&app, get("/get_weather?lat=51.5&lon=-0.12")).await;

        assert_eq!(
            location(&response),
            "/error?message=Request%20to%20Weather%20API%20failed%3A%20status%20503%20Service%20Unavailable"
        );
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn invalid_coordinates_redirect_to_error() {
        let app = app();
        for uri in [
            "/get_weather",
            "/get_weather?lat=abc&lon=1",
            "/get_weather?lat=91&lon=0",
            "/get_weather?lat=0&lon=-181",
        ] {
            let response = send(&app, get(uri)).await;
            assert_eq!(location(&response), "/error?message=Invalid%20coordinates", "{uri}");
        }
    }

    #[tokio::test]
    async fn weather_round_trip_through_the_session() {
        let app = app();

        let response = send(&app, get("/get_weather?lat=51.5&lon=-0.12")).await;
        assert_eq!(location(&response), "/get_weather_for_user");
        let cookie = cookie_pair(&response);
        assert!(cookie.starts_with("weather_session="));

        let request = Request::builder()
            .uri("/get_weather_for_user")
            .header(header::COOKIE, &cookie)
            .body(Body::empty())
            .unwrap();
        let response = send(&app, request).await;
        assert_eq!(response.status(), StatusCode::OK);

        let page = body_text(response).await;
        for needle in ["TestLocation", "clear sky", "5.5", "26.85"] {
            assert!(page.contains(needle), "missing {needle}");
        }
    }

    #[tokio::test]
    async fn validation_failure_redirects_to_error() {
        let mut payload = test_payload();
        payload["weather"] = json!([]);
        let response = send(&app_with(payload, false), get("/get_weather?lat=1&lon=1")).await;

        assert_eq!(
            location(&response),
            "/error?message=Missing%20or%20invalid%20data%20for%20forecast%3A%20%27N%2FA%27"
        );
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn sink_outage_still_renders() {
        let app = app_with(test_payload(), true);
        let response = send(&app, get("/get_weather?lat=1&lon=1")).await;
        assert_eq!(location(&response), "/get_weather_for_user");
    }

    #[tokio::test]
    async fn missing_or_forged_session_redirects_to_error() {
        let app = app();
        let expected = "/error?message=Missing%20key%3A%20weather%5Fdata";

        let response = send(&app, get("/get_weather_for_user")).await;
        assert_eq!(location(&response), expected);

        let request = Request::builder()
            .uri("/get_weather_for_user")
            .header(header::COOKIE, "weather_session=0123.abcd")
            .body(Body::empty())
            .unwrap();
        let response = send(&app, request).await;
        assert_eq!(location(&response), expected);
    }

    #[tokio::test]
    async fn error_page_shows_message_or_default() {
        let app = app();

        let page = body_text(send(&app, get("/error")).await).await;
        assert!(page.contains("An error occured"));

        let page = body_text(send(&app, get("/error?message=TestError")).await).await;
        assert!(page.contains("TestError"));

        let page = body_text(send(&app, get("/error?message=%3Cb%3Ehi%3C%2Fb%3E")).await).await;
        assert!(page.contains("&lt;b&gt;hi&lt;/b&gt;"));
    }
}
