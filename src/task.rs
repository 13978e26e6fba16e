use std::fmt::Display;

use derive_builder::Builder;

use crate::magnet::MagnetLink;

/// A single "add this magnet" request, built per invocation.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct DownloadRequest {
    pub magnet: MagnetLink,
    #[builder(default, setter(into, strip_option))]
    pub save_path: Option<String>,
    #[builder(default)]
    pub paused: bool,
    #[builder(default, setter(into, strip_option))]
    pub category: Option<String>,
    #[builder(default)]
    pub tags: Vec<String>,
    /// Upload rate cap in KiB/s.
    #[builder(default, setter(into, strip_option))]
    pub upload_limit_kib: Option<u32>,
}

/// Opaque success token returned by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub backend: &'static str,
    pub id: String,
    pub name: String,
    pub location: Option<String>,
}

impl Display for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        };
        write!(f, "{name} via {}", self.backend)?;
        if let Some(location) = &self.location {
            write!(f, ", saved to {location}")?;
        }
        Ok(())
    }
}
