//! hn-project: site file format and validation.

pub mod schema;
pub mod validate;

pub use schema::*;
pub use validate::{ValidationError, validate_site};

pub type ProjectResult<T> = Result<T, ProjectError>;

#[derive(thiserror::Error, Debug)]
pub enum ProjectError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn from_yaml_str(content: &str) -> ProjectResult<SiteDef> {
    let site: SiteDef = serde_yaml::from_str(content)?;
    validate_site(&site)?;
    Ok(site)
}

pub fn load_yaml(path: &std::path::Path) -> ProjectResult<SiteDef> {
    let content = std::fs::read_to_string(path)?;
    from_yaml_str(&content)
}

pub fn save_yaml(path: &std::path::Path, site: &SiteDef) -> ProjectResult<()> {
    validate_site(site)?;
    let content = serde_yaml::to_string(site)?;
    std::fs::write(path, content)?;
    Ok(())
}

pub fn load_json(path: &std::path::Path) -> ProjectResult<SiteDef> {
    let content = std::fs::read_to_string(path)?;
    let site: SiteDef = serde_json::from_str(&content)?;
    validate_site(&site)?;
    Ok(site)
}

pub fn save_json(path: &std::path::Path, site: &SiteDef) -> ProjectResult<()> {
    validate_site(site)?;
    let content = serde_json::to_string_pretty(site)?;
    std::fs::write(path, content)?;
    Ok(())
}
