//! HTTP device registry client
//!
//! Endpoints, relative to the configured host:
//! - `GET /endpoint/devices`: `[{"id", "name", "interfaces": [..]}]`
//! - `GET /endpoint/devices/{id}/clips?startTime=&endTime=`: clip records
//! - `GET /endpoint/devices/{id}/clips/{clipId}`: clip media

use anyhow::{Context, Result};
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, Url};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Capability, Device, DeviceRegistry};
use crate::clip::{RawClip, RunWindow};
use crate::upload::Payload;

/// Default registry host
pub const DEFAULT_HOST: &str = "https://192.168.10.7:10443";

/// Connection parameters for the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub host: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Accept self-signed TLS certificates
    pub allow_self_signed: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            username: None,
            password: None,
            allow_self_signed: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeviceRecord {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    interfaces: Vec<String>,
}

/// Shared HTTP session
struct Session {
    client: Client,
    base: Url,
    username: Option<String>,
    password: Option<String>,
}

impl Session {
    fn get(&self, segments: &[&str]) -> Result<RequestBuilder> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("registry host cannot be a base URL: {}", self.base))?
            .pop_if_empty()
            .push("endpoint")
            .extend(segments);

        let mut req = self.client.get(url);
        if let Some(user) = &self.username {
            req = req.basic_auth(user, self.password.as_ref());
        }
        Ok(req)
    }
}

/// Registry reached over HTTP(S).
#[derive(Clone)]
pub struct HttpRegistry {
    session: Arc<Session>,
}

impl HttpRegistry {
    /// Build the client. No request is made until devices are listed.
    pub fn connect(config: &RegistryConfig) -> Result<Self> {
        let base = Url::parse(&config.host)
            .with_context(|| format!("Invalid registry host: {}", config.host))?;

        if config.allow_self_signed {
            warn!("Accepting self-signed certificates from {}", base);
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(config.allow_self_signed)
            .build()
            .context("Failed to build HTTP client")?;

        info!("Device registry: {}", base);
        Ok(Self {
            session: Arc::new(Session {
                client,
                base,
                username: config.username.clone(),
                password: config.password.clone(),
            }),
        })
    }
}

#[async_trait::async_trait]
impl DeviceRegistry for HttpRegistry {
    async fn devices(&self) -> Result<Vec<Arc<dyn Device>>> {
        let records: Vec<DeviceRecord> = self
            .session
            .get(&["devices"])?
            .send()
            .await
            .context("Failed to reach device registry")?
            .error_for_status()
            .context("Device registry returned error status")?
            .json()
            .await
            .context("Invalid device list")?;

        debug!("Registry reported {} devices", records.len());
        Ok(records
            .into_iter()
            .map(|r| {
                Arc::new(HttpDevice {
                    session: Arc::clone(&self.session),
                    capabilities: r
                        .interfaces
                        .iter()
                        .map(|i| Capability::from_interface(i))
                        .collect(),
                    id: r.id,
                    name: r.name,
                }) as Arc<dyn Device>
            })
            .collect())
    }
}

/// Device exposed by an [`HttpRegistry`]
struct HttpDevice {
    session: Arc<Session>,
    id: String,
    name: String,
    capabilities: BTreeSet<Capability>,
}

#[async_trait::async_trait]
impl Device for HttpDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &BTreeSet<Capability> {
        &self.capabilities
    }

    async fn query_clips(&self, window: RunWindow) -> Result<Vec<RawClip>> {
        let clips: Vec<RawClip> = self
            .session
            .get(&["devices", &self.id, "clips"])?
            .query(&[("startTime", window.start_ms), ("endTime", window.end_ms)])
            .send()
            .await
            .with_context(|| format!("Failed to query clips from {}", self.id))?
            .error_for_status()
            .context("Clip query returned error status")?
            .json()
            .await
            .context("Invalid clip list")?;
        Ok(clips)
    }

    async fn fetch_clip(&self, clip_id: &str) -> Result<Payload> {
        let response = self
            .session
            .get(&["devices", &self.id, "clips", clip_id])?
            .send()
            .await
            .with_context(|| format!("Failed to request clip {}", clip_id))?
            .error_for_status()
            .with_context(|| format!("Clip {} returned error status", clip_id))?;

        if let Some(len) = response.content_length() {
            debug!("Clip {} is {} bytes", clip_id, len);
        }

        let stream = response.bytes_stream().map(|r| r.map_err(io::Error::other));
        Ok(Payload::Stream(stream.boxed()))
    }
}
