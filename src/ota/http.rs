use std::time::Duration;

use embedded_svc::http::{Headers, Method, Status};
use embedded_svc::io::Read;
use esp_idf_svc::http::client::{
    Configuration as HttpConfig, EspHttpConnection, FollowRedirectsPolicy,
};
use restarter_core::{HttpBody, Transport, TransportError};

use crate::config;

/// One TLS connection per request, trusted via the ESP-IDF certificate
/// bundle (the feed and asset hosts sit behind rotating CDN cert chains).
pub struct EspTransport;

impl Transport for EspTransport {
    fn get(&self, url: &str, timeout: Duration) -> Result<Box<dyn HttpBody>, TransportError> {
        let mut conn = EspHttpConnection::new(&HttpConfig {
            buffer_size: Some(4096),
            timeout: Some(timeout),
            follow_redirects_policy: FollowRedirectsPolicy::FollowAll,
            crt_bundle_attach: Some(esp_idf_sys::esp_crt_bundle_attach),
            ..Default::default()
        })
        .map_err(|e| TransportError(format!("HTTPS begin failed: {e}")))?;

        conn.initiate_request(
            Method::Get,
            url,
            &[
                ("Accept", config::OTA_ACCEPT),
                ("User-Agent", config::OTA_USER_AGENT),
            ],
        )
        .map_err(|e| TransportError(format!("request failed: {e}")))?;
        conn.initiate_response()
            .map_err(|e| TransportError(format!("no response: {e}")))?;

        Ok(Box::new(EspHttpBody { conn }))
    }
}

struct EspHttpBody {
    conn: EspHttpConnection,
}

impl HttpBody for EspHttpBody {
    fn status(&self) -> u16 {
        self.conn.status()
    }

    fn content_length(&self) -> Option<u64> {
        self.conn
            .header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.conn
            .read(buf)
            .map_err(|e| TransportError(format!("read failed: {e}")))
    }
}
