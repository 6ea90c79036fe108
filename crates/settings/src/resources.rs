//! Resource descriptors from named values
//!
//! The source needs a complete set of values; a target with any value
//! missing is simply not offered.

use tracing::{info, warn};

use common::error::{Error, Result};
use common::models::ResourceDescriptor;

/// Maximum number of copy targets
pub const MAX_TARGETS: usize = 3;

const ENDPOINT: &str = "ENDPOINT";
const SECRET_STORE_URL: &str = "KV_URL";
const SECRET_NAME: &str = "SECRET_NAME";
const DISPLAY_NAME: &str = "NAME";

/// Source and targets configured for a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceConfig {
    /// Resource models are copied from
    pub source: ResourceDescriptor,
    /// Resources models are copied to, in slot order
    pub targets: Vec<ResourceDescriptor>,
}

impl ResourceConfig {
    /// Reads descriptors from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads descriptors through `lookup`
    ///
    /// Slot 1 falls back to the un-numbered `TARGET_*` values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source = match read_descriptor(&lookup, "SOURCE", "source")? {
            Some(source) => source,
            None => {
                return Err(Error::Config(
                    "SOURCE_ENDPOINT, SOURCE_KV_URL and SOURCE_SECRET_NAME must be set".to_string(),
                ))
            }
        };

        let mut targets = Vec::new();
        for slot in 1..=MAX_TARGETS {
            let default_name = format!("target-{}", slot);
            let mut descriptor = read_descriptor(&lookup, &format!("TARGET{}", slot), &default_name)?;

            if descriptor.is_none() && slot == 1 {
                descriptor = read_descriptor(&lookup, "TARGET", &default_name)?;
            }

            if let Some(descriptor) = descriptor {
                targets.push(descriptor);
            }
        }

        let config = Self { source, targets };
        config.check_unique_names()?;

        info!(
            "Configured source {} with {} target(s)",
            config.source,
            config.targets.len()
        );

        Ok(config)
    }

    /// Looks up a target by display name
    pub fn target(&self, name: &str) -> Option<&ResourceDescriptor> {
        self.targets.iter().find(|t| t.display_name == name)
    }

    /// Looks up the source or a target by display name
    pub fn resource(&self, name: &str) -> Option<&ResourceDescriptor> {
        if self.source.display_name == name {
            Some(&self.source)
        } else {
            self.target(name)
        }
    }

    fn check_unique_names(&self) -> Result<()> {
        let mut seen = vec![self.source.display_name.as_str()];
        for target in &self.targets {
            if seen.contains(&target.display_name.as_str()) {
                return Err(Error::Config(format!(
                    "Duplicate resource display name: {}",
                    target.display_name
                )));
            }
            seen.push(&target.display_name);
        }
        Ok(())
    }
}

fn read_descriptor<F>(lookup: &F, prefix: &str, default_name: &str) -> Result<Option<ResourceDescriptor>>
where
    F: Fn(&str) -> Option<String>,
{
    let value = |suffix: &str| {
        lookup(&format!("{}_{}", prefix, suffix))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let endpoint = value(ENDPOINT);
    let secret_store_url = value(SECRET_STORE_URL);
    let secret_name = value(SECRET_NAME);

    let (endpoint, secret_store_url, secret_name) = match (endpoint, secret_store_url, secret_name) {
        (Some(e), Some(s), Some(n)) => (e, s, n),
        (None, None, None) => return Ok(None),
        _ => {
            warn!("{}_* values are incomplete, resource not offered", prefix);
            return Ok(None);
        }
    };

    let display_name = value(DISPLAY_NAME).unwrap_or_else(|| default_name.to_string());

    Ok(Some(ResourceDescriptor::new(
        normalize_url(prefix, ENDPOINT, &endpoint)?,
        normalize_url(prefix, SECRET_STORE_URL, &secret_store_url)?,
        secret_name,
        display_name,
    )))
}

fn normalize_url(prefix: &str, suffix: &str, url: &str) -> Result<String> {
    if !(url.starts_with("https://") || url.starts_with("http://")) {
        return Err(Error::Config(format!(
            "{}_{} must be an http(s) URL, got '{}'",
            prefix, suffix, url
        )));
    }
    Ok(url.trim_end_matches('/').to_string())
}
