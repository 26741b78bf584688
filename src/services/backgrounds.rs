//! Background asset tree: `<root>/<team>/<file>`
//!
//! Team and file names come straight from form fields, so every lookup is
//! confined to the root: each name must be a single plain path component
//! and the resolved file must canonicalize inside the canonical root.

use crate::{
    error::{CompositeError, Result},
    services::io::ImageIOService,
};
use image::DynamicImage;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Catalogue entry for one background file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackgroundEntry {
    pub name: String,
    /// Base64 data URL of the file contents
    pub preview: String,
}

/// Read-only view of the background asset tree
#[derive(Debug, Clone)]
pub struct BackgroundStore {
    root: PathBuf,
}

impl BackgroundStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject anything but a single normal path component
    fn validate_component(kind: &str, value: &str) -> Result<()> {
        if value.is_empty() {
            return Err(CompositeError::invalid_input(format!("Missing {kind}")));
        }

        let mut components = Path::new(value).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) if name == value => Ok(()),
            _ => Err(CompositeError::invalid_input(format!(
                "Invalid {kind} name '{value}'"
            ))),
        }
    }

    /// Locate `<root>/<team>/<name>` without leaving the root
    ///
    /// # Errors
    /// - `InvalidInput` for names that are not a single plain component or
    ///   resolve outside the root
    /// - `BackgroundNotFound` when no such file exists
    pub fn resolve(&self, team: &str, name: &str) -> Result<PathBuf> {
        Self::validate_component("team", team)?;
        Self::validate_component("background", name)?;

        let candidate = self.root.join(team).join(name);
        if !candidate.is_file() {
            return Err(CompositeError::background_not_found(format!("{team}/{name}")));
        }

        let canonical_root = self
            .root
            .canonicalize()
            .map_err(|e| CompositeError::file_io_error("resolve backgrounds directory", &self.root, &e))?;
        let canonical = candidate
            .canonicalize()
            .map_err(|e| CompositeError::file_io_error("resolve background", &candidate, &e))?;

        if !canonical.starts_with(&canonical_root) {
            log::warn!(
                "Background {team}/{name} resolves outside {}",
                canonical_root.display()
            );
            return Err(CompositeError::invalid_input(format!(
                "Background '{team}/{name}' is outside the backgrounds directory"
            )));
        }

        Ok(canonical)
    }

    /// Resolve and decode a background
    ///
    /// # Errors
    /// - See [`BackgroundStore::resolve`]
    /// - File is not a decodable image
    pub fn load(&self, team: &str, name: &str) -> Result<DynamicImage> {
        let path = self.resolve(team, name)?;
        ImageIOService::load_image(path)
    }

    /// Team directories under the root, sorted by name
    ///
    /// # Errors
    /// - Directory traversal failures
    pub fn list_teams(&self) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            log::warn!("Backgrounds directory {} does not exist", self.root.display());
            return Ok(Vec::new());
        }

        let mut teams = Vec::new();
        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| {
                CompositeError::internal(format!("Failed to list backgrounds directory: {e}"))
            })?;
            if entry.file_type().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    teams.push(name.to_string());
                }
            }
        }

        Ok(teams)
    }

    /// Supported image files of one team with inline previews, sorted by name
    ///
    /// # Errors
    /// - `InvalidInput` for an invalid team name
    /// - `BackgroundNotFound` for an unknown team
    /// - File read failures
    pub fn list_backgrounds(&self, team: &str) -> Result<Vec<BackgroundEntry>> {
        Self::validate_component("team", team)?;

        let team_dir = self.root.join(team);
        if !team_dir.is_dir() {
            return Err(CompositeError::background_not_found(format!("team '{team}'")));
        }

        let mut backgrounds = Vec::new();
        for entry in WalkDir::new(&team_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| {
                CompositeError::internal(format!("Failed to list team '{team}': {e}"))
            })?;
            let path = entry.path();
            let (Some(name), Some(mime)) = (
                entry.file_name().to_str(),
                ImageIOService::mime_type(path),
            ) else {
                continue;
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let bytes = std::fs::read(path)
                .map_err(|e| CompositeError::file_io_error("read background", path, &e))?;
            backgrounds.push(BackgroundEntry {
                name: name.to_string(),
                preview: ImageIOService::data_url(mime, &bytes),
            });
        }

        Ok(backgrounds)
    }
}
