//! Template structure as registered with the messaging platform.
//!
//! Components are stored as the platform returns them (`type`, `format`,
//! `text`, `buttons`, `cards`) and validated into typed enums on demand, so
//! an unknown component coming back from the platform does not make the whole
//! template unreadable.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;
use utoipa::ToSchema;

pub const MAX_CAROUSEL_CARDS: usize = 10;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").expect("placeholder pattern is valid")
});

/// Template validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Invalid carousel configuration: {0}")]
    CarouselConfiguration(String),

    #[error("Invalid media type: {0}")]
    InvalidMediaType(String),

    #[error("Invalid template component type: {0}")]
    InvalidComponentType(String),

    #[error("Missing media: {0}")]
    MissingMedia(String),

    #[error("Missing value for placeholder {{{{{placeholder}}}}} in {component}")]
    MissingVariable { component: String, placeholder: String },
}

/// Media kinds accepted for headers, carousel cards and uploads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum MediaType {
    Image,
    Video,
    Document,
    Audio,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "IMAGE",
            MediaType::Video => "VIDEO",
            MediaType::Document => "DOCUMENT",
            MediaType::Audio => "AUDIO",
        }
    }

    /// Parameter type name used in send payloads (`image`, `video`, ...)
    pub fn parameter_name(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Document => "document",
            MediaType::Audio => "audio",
        }
    }

    /// Map an upload `Content-Type` to a media type.
    pub fn from_content_type(content_type: &str) -> Result<Self, TemplateError> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "image/jpeg" | "image/png" | "image/webp" => Ok(MediaType::Image),
            "video/mp4" | "video/3gpp" => Ok(MediaType::Video),
            "audio/mpeg" | "audio/ogg" | "audio/aac" | "audio/mp4" | "audio/amr" => {
                Ok(MediaType::Audio)
            }
            "application/pdf"
            | "application/msword"
            | "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            | "application/vnd.ms-excel"
            | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            | "text/plain" => Ok(MediaType::Document),
            _ => Err(TemplateError::InvalidMediaType(content_type.to_string())),
        }
    }
}

impl FromStr for MediaType {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IMAGE" => Ok(MediaType::Image),
            "VIDEO" => Ok(MediaType::Video),
            "DOCUMENT" => Ok(MediaType::Document),
            "AUDIO" => Ok(MediaType::Audio),
            _ => Err(TemplateError::InvalidMediaType(s.to_string())),
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level template component kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentType {
    Header,
    Body,
    Footer,
    Buttons,
    Carousel,
}

impl FromStr for ComponentType {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HEADER" => Ok(ComponentType::Header),
            "BODY" => Ok(ComponentType::Body),
            "FOOTER" => Ok(ComponentType::Footer),
            "BUTTONS" => Ok(ComponentType::Buttons),
            "CAROUSEL" => Ok(ComponentType::Carousel),
            _ => Err(TemplateError::InvalidComponentType(s.to_string())),
        }
    }
}

/// Header format: plain text or one of the media kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderFormat {
    Text,
    Media(MediaType),
}

impl FromStr for HeaderFormat {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("TEXT") {
            return Ok(HeaderFormat::Text);
        }
        MediaType::from_str(s).map(HeaderFormat::Media)
    }
}

/// A component as stored with the template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateComponent {
    #[serde(rename = "type")]
    pub component_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<TemplateButton>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cards: Vec<CarouselCard>,
}

impl TemplateComponent {
    pub fn kind(&self) -> Result<ComponentType, TemplateError> {
        self.component_type.parse()
    }

    /// Header format, defaulting to TEXT when the platform omits it.
    pub fn header_format(&self) -> Result<HeaderFormat, TemplateError> {
        match self.format.as_deref() {
            None => Ok(HeaderFormat::Text),
            Some(f) => f.parse(),
        }
    }

    pub fn placeholders(&self) -> Vec<String> {
        self.text.as_deref().map(placeholders).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateButton {
    #[serde(rename = "type")]
    pub button_type: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl TemplateButton {
    pub fn is_url(&self) -> bool {
        self.button_type.eq_ignore_ascii_case("URL")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarouselCard {
    pub components: Vec<TemplateComponent>,
}

/// Distinct placeholder names in order of first appearance (`{{1}}`, `{{first_name}}`).
pub fn placeholders(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in PLACEHOLDER.captures_iter(text).filter_map(|c| c.get(1)) {
        if !names.iter().any(|n| n == name.as_str()) {
            names.push(name.as_str().to_string());
        }
    }
    names
}

/// Structural validation of a template definition.
///
/// Checks component types and header formats, plus the shape of carousel cards.
/// Does not look at per-recipient values.
pub fn validate_components(components: &[TemplateComponent]) -> Result<(), TemplateError> {
    let mut has_body = false;

    for component in components {
        match component.kind()? {
            ComponentType::Header => {
                component.header_format()?;
            }
            ComponentType::Body => has_body = true,
            ComponentType::Footer | ComponentType::Buttons => {}
            ComponentType::Carousel => validate_carousel(component)?,
        }
    }

    if !has_body {
        return Err(TemplateError::InvalidComponentType(
            "template has no BODY component".to_string(),
        ));
    }
    Ok(())
}

fn validate_carousel(component: &TemplateComponent) -> Result<(), TemplateError> {
    let count = component.cards.len();
    if count == 0 || count > MAX_CAROUSEL_CARDS {
        return Err(TemplateError::CarouselConfiguration(format!(
            "carousel must have between 1 and {} cards, found {}",
            MAX_CAROUSEL_CARDS, count
        )));
    }

    for (index, card) in component.cards.iter().enumerate() {
        let mut header_media = None;
        for inner in &card.components {
            match inner.kind()? {
                ComponentType::Header => match inner.header_format()? {
                    HeaderFormat::Media(media) => header_media = Some(media),
                    HeaderFormat::Text => {
                        return Err(TemplateError::CarouselConfiguration(format!(
                            "card {} header must be IMAGE or VIDEO",
                            index
                        )))
                    }
                },
                ComponentType::Body | ComponentType::Buttons => {}
                other => {
                    return Err(TemplateError::CarouselConfiguration(format!(
                        "card {} cannot contain {:?}",
                        index, other
                    )))
                }
            }
        }

        match header_media {
            Some(MediaType::Image) | Some(MediaType::Video) => {}
            Some(other) => {
                return Err(TemplateError::InvalidMediaType(format!(
                    "carousel card {} header must be IMAGE or VIDEO, found {}",
                    index, other
                )))
            }
            None => {
                return Err(TemplateError::CarouselConfiguration(format!(
                    "card {} has no media header",
                    index
                )))
            }
        }
    }
    Ok(())
}
