use std::thread;
use std::time::Duration;

use reqwest::blocking::{RequestBuilder, Response};

use crate::error::ReplicaError;

const MAX_RETRIES: usize = 3;
const BASE_DELAY_MS: u64 = 200;

/// Sends the request built by `make_req`, retrying throttling, gateway
/// errors and connection failures with a linearly growing delay. The last
/// response is returned as is so callers map its status themselves.
pub fn send_with_retries<F, E>(mut make_req: F, map_err: E) -> Result<Response, ReplicaError>
where
    F: FnMut() -> RequestBuilder,
    E: Fn(String) -> ReplicaError,
{
    let mut attempt = 0usize;
    loop {
        match make_req().send() {
            Ok(resp) => {
                if attempt < MAX_RETRIES && is_retryable_status(resp.status().as_u16()) {
                    thread::sleep(retry_delay(attempt));
                    attempt += 1;
                    continue;
                }
                return Ok(resp);
            }
            Err(err) => {
                if attempt < MAX_RETRIES && is_retryable_error(&err) {
                    thread::sleep(retry_delay(attempt));
                    attempt += 1;
                    continue;
                }
                return Err(map_err(err.to_string()));
            }
        }
    }
}

fn retry_delay(attempt: usize) -> Duration {
    Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1))
}

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
