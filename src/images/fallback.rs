//! Picks the first candidate image that actually loads.
//!
//! Each candidate is tried up to `1 + max_retries` times before moving to the
//! next one; after the last candidate the machine is exhausted.

use async_trait::async_trait;
use reqwest::{Client, header::CONTENT_TYPE};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackState {
    Loading { index: usize, attempt: u32 },
    Loaded { index: usize },
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct ImageFallback {
    candidates: Vec<String>,
    max_retries: u32,
    state: FallbackState,
}

impl ImageFallback {
    pub fn new(candidates: Vec<String>, max_retries: u32) -> Self {
        let state = if candidates.is_empty() {
            FallbackState::Exhausted
        } else {
            FallbackState::Loading {
                index: 0,
                attempt: 0,
            }
        };
        Self {
            candidates,
            max_retries,
            state,
        }
    }

    pub fn state(&self) -> FallbackState {
        self.state
    }

    /// URL to attempt (or the one that loaded).
    pub fn current(&self) -> Option<&str> {
        match self.state {
            FallbackState::Loading { index, .. } | FallbackState::Loaded { index } => {
                self.candidates.get(index).map(String::as_str)
            }
            FallbackState::Exhausted => None,
        }
    }

    pub fn on_loaded(&mut self) -> FallbackState {
        if let FallbackState::Loading { index, .. } = self.state {
            self.state = FallbackState::Loaded { index };
        }
        self.state
    }

    pub fn on_error(&mut self) -> FallbackState {
        if let FallbackState::Loading { index, attempt } = self.state {
            self.state = if attempt < self.max_retries {
                FallbackState::Loading {
                    index,
                    attempt: attempt + 1,
                }
            } else if index + 1 < self.candidates.len() {
                FallbackState::Loading {
                    index: index + 1,
                    attempt: 0,
                }
            } else {
                FallbackState::Exhausted
            };
        }
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.state, FallbackState::Loading { .. })
    }
}

#[async_trait]
pub trait ImageProbe: Send + Sync {
    async fn loads(&self, url: &str) -> bool;
}

/// Accepts 2xx responses that declare an `image/*` content type.
#[derive(Debug, Clone)]
pub struct HttpImageProbe {
    http: Client,
}

impl HttpImageProbe {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ImageProbe for HttpImageProbe {
    async fn loads(&self, url: &str) -> bool {
        match self.http.get(url).send().await {
            Ok(response) => {
                let is_image = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .is_some_and(|v| v.starts_with("image/"));
                response.status().is_success() && is_image
            }
            Err(err) => {
                debug!(target: "showroom.images", url = %url, error = %err, "image_probe_failed");
                false
            }
        }
    }
}

pub async fn resolve_first_loadable<P>(
    candidates: Vec<String>,
    probe: &P,
    max_retries: u32,
) -> Option<String>
where
    P: ImageProbe + ?Sized,
{
    let mut machine = ImageFallback::new(candidates, max_retries);
    while let Some(url) = machine.current().map(str::to_string) {
        if machine.is_terminal() {
            return Some(url);
        }
        if probe.loads(&url).await {
            machine.on_loaded();
        } else {
            machine.on_error();
        }
    }
    None
}
