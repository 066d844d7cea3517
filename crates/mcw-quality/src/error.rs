use thiserror::Error;

#[derive(Debug, Error)]
pub enum QualityConfigError {
    #[error("empty pattern at {list}[{index}] would match every input")]
    EmptyPattern { list: &'static str, index: usize },
    #[error("min_title_length {min} exceeds max_title_length {max}")]
    TitleBounds { min: usize, max: usize },
    #[error("max_url_length must be positive")]
    ZeroMaxUrlLength,
    #[error("parsing quality config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
