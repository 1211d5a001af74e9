//! Villa REST backend client.
//!
//! Requests carry the configured bearer token. A 401 triggers one refresh
//! through `/auth/refresh` and a single retry; refreshed tokens are kept in
//! memory for the life of the process.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::availability::{AvailabilityError, BookedDatesSource};
use crate::config::ApiConfig;
use crate::selection::Stay;

// ─── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookedDatesResponse {
    #[serde(default)]
    booked_dates: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    access_token:  String,
    refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BookingRequest<'a> {
    villa_id:  &'a str,
    check_in:  &'a str,
    check_out: &'a str,
}

/// What the backend echoes back for a created booking. Only the fields the
/// CLI prints are decoded.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingReceipt {
    pub id:          serde_json::Value,
    pub status:      Option<String>,
    pub total_price: Option<f64>,
}

// ─── Client ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Tokens {
    access:  Option<String>,
    refresh: Option<String>,
}

pub struct ApiClient {
    http:     Client,
    base_url: Url,
    tokens:   Mutex<Tokens>,
}

impl ApiClient {
    pub fn new(cfg: &ApiConfig) -> Result<Self> {
        let base_url = Url::parse(&cfg.base_url)
            .map_err(|e| anyhow!("invalid api.base_url {:?}: {e}", cfg.base_url))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("api.base_url {:?} cannot hold a path", cfg.base_url));
        }
        Ok(Self {
            http: Client::builder()
                .timeout(std::time::Duration::from_secs(cfg.timeout_seconds))
                .user_agent(concat!("villabook/", env!("CARGO_PKG_VERSION")))
                .build()?,
            base_url,
            tokens: Mutex::new(Tokens {
                access:  cfg.access_token.clone(),
                refresh: cfg.refresh_token.clone(),
            }),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // Checked in `new`: the base always accepts path segments.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    // ── Auth ──────────────────────────────────────────────────────────────────

    /// Attach the current access token and hand back the token used.
    async fn authorize(&self, req: RequestBuilder) -> (RequestBuilder, Option<String>) {
        let access = self.tokens.lock().await.access.clone();
        match access {
            Some(token) => (req.bearer_auth(&token), Some(token)),
            None        => (req, None),
        }
    }

    /// Send, refreshing the access token and retrying once on 401.
    async fn send<F>(&self, build: F) -> reqwest::Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let (req, rejected) = self.authorize(build()).await;
        let resp = req.send().await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }
        match self.refresh_tokens(rejected.as_deref()).await {
            Ok(true)  => self.authorize(build()).await.0.send().await,
            Ok(false) => Ok(resp),
            Err(e)    => {
                tracing::warn!("token refresh failed: {e}");
                Ok(resp)
            }
        }
    }

    /// Replace the access token the server rejected. Returns false when there
    /// is no refresh token to use. Concurrent 401s queue on the lock; only the
    /// first one talks to the server, the rest see the new token and retry.
    async fn refresh_tokens(&self, rejected: Option<&str>) -> Result<bool> {
        let mut tokens = self.tokens.lock().await;
        if tokens.access.as_deref() != rejected {
            return Ok(true);
        }
        let Some(refresh) = tokens.refresh.clone() else {
            return Ok(false);
        };

        let resp: TokenResponse = self.http.post(self.endpoint(&["auth", "refresh"]))
            .json(&RefreshRequest { refresh_token: &refresh })
            .send().await?.error_for_status()?.json().await?;

        tokens.access = Some(resp.access_token);
        if let Some(rt) = resp.refresh_token {
            tokens.refresh = Some(rt);
        }
        tracing::info!("access token refreshed");
        Ok(true)
    }

    // ── Availability ──────────────────────────────────────────────────────────

    pub async fn fetch_booked_dates(
        &self, villa_id: &str, year: i32, month: u32,
    ) -> Result<Vec<String>, AvailabilityError> {
        let url   = self.endpoint(&["villas", villa_id, "booked-dates"]);
        let query = [("year", year.to_string()), ("month", month.to_string())];

        let resp = self.send(|| self.http.get(url.clone()).query(&query))
            .await
            .map_err(|e| AvailabilityError::Network(e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(AvailabilityError::NotFound(villa_id.to_owned()));
        }
        let resp = resp.error_for_status()
            .map_err(|e| AvailabilityError::Network(e.to_string()))?;

        let body: BookedDatesResponse = resp.json().await
            .map_err(|e| AvailabilityError::Decode(e.to_string()))?;
        Ok(body.booked_dates)
    }

    // ── Bookings ──────────────────────────────────────────────────────────────

    pub async fn create_booking(&self, villa_id: &str, stay: &Stay) -> Result<BookingReceipt> {
        let url  = self.endpoint(&["bookings"]);
        let body = BookingRequest {
            villa_id,
            check_in:  &stay.check_in,
            check_out: &stay.check_out,
        };

        let receipt: BookingReceipt = self.send(|| self.http.post(url.clone()).json(&body))
            .await?.error_for_status()?.json().await?;
        tracing::info!("booking {} created for {villa_id}", receipt.id);
        Ok(receipt)
    }
}

#[async_trait]
impl BookedDatesSource for ApiClient {
    async fn booked_dates(
        &self, villa_id: &str, year: i32, month: u32,
    ) -> Result<Vec<String>, AvailabilityError> {
        self.fetch_booked_dates(villa_id, year, month).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Answers one connection per canned response, in order, and returns the
    /// raw requests it saw.
    async fn serve(responses: Vec<(u16, &'static str)>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr     = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().await.unwrap();
                seen.push(read_request(&mut stream).await);
                reply(&mut stream, status, body).await;
            }
            seen
        });

        (format!("http://{addr}/api"), handle)
    }

    /// Answers every connection until the test ends, letting `route` pick the
    /// reply from the raw request.
    async fn serve_routed<F>(route: F) -> String
    where
        F: Fn(&str) -> (u16, String) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr     = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let request = read_request(&mut stream).await;
                let (status, body) = route(&request);
                reply(&mut stream, status, &body).await;
            }
        });
        format!("http://{addr}/api")
    }

    async fn reply(stream: &mut tokio::net::TcpStream, status: u16, body: &str) {
        let reason = match status {
            200 => "OK", 201 => "Created", 401 => "Unauthorized", 404 => "Not Found",
            _   => "Error",
        };
        let reply = format!(
            "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\n\
             Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len(),
        );
        stream.write_all(reply.as_bytes()).await.unwrap();
        let _ = stream.shutdown().await;
    }

    async fn read_request(stream: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 { break; }
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf);
            if let Some(head_end) = text.find("\r\n\r\n") {
                let content_length = text[..head_end].lines()
                    .find_map(|l| {
                        let (k, v) = l.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length").then(|| v.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                if buf.len() >= head_end + 4 + content_length { break; }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn client(base_url: &str, access: Option<&str>, refresh: Option<&str>) -> ApiClient {
        ApiClient::new(&ApiConfig {
            base_url:        base_url.to_owned(),
            timeout_seconds: 5,
            access_token:    access.map(str::to_owned),
            refresh_token:   refresh.map(str::to_owned),
        }).unwrap()
    }

    #[tokio::test]
    async fn decodes_booked_dates() {
        let (base, server) = serve(vec![
            (200, r#"{"bookedDates":["2025-06-10","2025-06-11"]}"#),
        ]).await;
        let api = client(&base, Some("tok"), None);

        let dates = api.fetch_booked_dates("villa 7", 2025, 6).await.unwrap();
        assert_eq!(dates, vec!["2025-06-10", "2025-06-11"]);

        let requests = server.await.unwrap();
        let first_line = requests[0].lines().next().unwrap();
        assert_eq!(first_line, "GET /api/villas/villa%207/booked-dates?year=2025&month=6 HTTP/1.1");
        assert!(requests[0].to_ascii_lowercase().contains("authorization: bearer tok"));
    }

    #[tokio::test]
    async fn missing_villa_maps_to_not_found() {
        let (base, _server) = serve(vec![(404, r#"{"message":"Villa not found"}"#)]).await;
        let api = client(&base, None, None);

        assert_eq!(
            api.fetch_booked_dates("gone", 2025, 6).await,
            Err(AvailabilityError::NotFound("gone".into())),
        );
    }

    #[tokio::test]
    async fn server_error_is_a_network_error() {
        let (base, _server) = serve(vec![(500, "{}")]).await;
        let api = client(&base, None, None);

        assert!(matches!(
            api.fetch_booked_dates("villa-1", 2025, 6).await,
            Err(AvailabilityError::Network(_)),
        ));
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let api = client(&format!("http://{addr}/api"), None, None);

        assert!(matches!(
            api.fetch_booked_dates("villa-1", 2025, 6).await,
            Err(AvailabilityError::Network(_)),
        ));
    }

    #[tokio::test]
    async fn refreshes_once_on_unauthorized() {
        let (base, server) = serve(vec![
            (401, r#"{"message":"expired"}"#),
            (200, r#"{"accessToken":"fresh","refreshToken":"r2"}"#),
            (200, r#"{"bookedDates":["2025-06-20"]}"#),
        ]).await;
        let api = client(&base, Some("stale"), Some("r1"));

        let dates = api.booked_dates("villa-1", 2025, 6).await.unwrap();
        assert_eq!(dates, vec!["2025-06-20"]);

        let requests = server.await.unwrap();
        assert!(requests[1].starts_with("POST /api/auth/refresh "));
        assert!(requests[1].contains(r#""refreshToken":"r1""#));
        assert!(requests[2].to_ascii_lowercase().contains("authorization: bearer fresh"));

        let tokens = api.tokens.lock().await;
        assert_eq!(tokens.access.as_deref(), Some("fresh"));
        assert_eq!(tokens.refresh.as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn concurrent_unauthorized_requests_share_one_refresh() {
        use crate::availability::load_booked_dates;
        use crate::calendar::YearMonth;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let refreshes = Arc::new(AtomicUsize::new(0));
        let counter   = Arc::clone(&refreshes);
        // Refresh tokens are single-use: a second refresh with r1 fails.
        let base = serve_routed(move |req| {
            let lower = req.to_ascii_lowercase();
            if req.starts_with("POST /api/auth/refresh ") {
                return match counter.fetch_add(1, Ordering::SeqCst) {
                    0 => (200, r#"{"accessToken":"fresh"}"#.to_owned()),
                    _ => (401, r#"{"message":"refresh token already used"}"#.to_owned()),
                };
            }
            if !lower.contains("authorization: bearer fresh") {
                return (401, r#"{"message":"expired"}"#.to_owned());
            }
            if req.contains("month=6 ") {
                (200, r#"{"bookedDates":["2025-06-20"]}"#.to_owned())
            } else {
                (200, r#"{"bookedDates":["2025-07-02"]}"#.to_owned())
            }
        }).await;
        let api = client(&base, Some("stale"), Some("r1"));

        let set = load_booked_dates(&api, "villa-1", YearMonth::new(2025, 6).unwrap())
            .await
            .unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(api.tokens.lock().await.access.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn unauthorized_without_refresh_token_is_not_retried() {
        let (base, server) = serve(vec![(401, "{}")]).await;
        let api = client(&base, Some("stale"), None);

        assert!(matches!(
            api.fetch_booked_dates("villa-1", 2025, 6).await,
            Err(AvailabilityError::Network(_)),
        ));
        assert_eq!(server.await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn posts_bookings() {
        let (base, server) = serve(vec![
            (201, r#"{"id":42,"status":"pending","totalPrice":1350.0}"#),
        ]).await;
        let api  = client(&base, Some("tok"), None);
        let stay = Stay { check_in: "2025-06-05".into(), check_out: "2025-06-08".into(), nights: 3 };

        let receipt = api.create_booking("villa-1", &stay).await.unwrap();
        assert_eq!(receipt.id, serde_json::json!(42));
        assert_eq!(receipt.status.as_deref(), Some("pending"));
        assert_eq!(receipt.total_price, Some(1350.0));

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("POST /api/bookings "));
        let body = requests[0].split("\r\n\r\n").nth(1).unwrap();
        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(json, serde_json::json!({
            "villaId": "villa-1", "checkIn": "2025-06-05", "checkOut": "2025-06-08",
        }));
    }

    #[test]
    fn rejects_unusable_base_urls() {
        for bad in ["not a url", "mailto:villas@example.com"] {
            let cfg = ApiConfig { base_url: bad.to_owned(), ..ApiConfig::default() };
            assert!(ApiClient::new(&cfg).is_err(), "{bad}");
        }
    }
}
