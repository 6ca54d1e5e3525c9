use crate::config::Config;
use crate::error::{PipelineError, Result};
use encoding_rs::{Encoding, UTF_8};
use std::borrow::Cow;

/// Turns member-table bytes into text with an explicitly chosen encoding.
#[derive(Debug, Clone, Copy)]
pub struct TextDecoder {
    /// Forced encoding; malformed input is rejected rather than replaced.
    strict: Option<&'static Encoding>,
    /// Used when `strict` is unset and the bytes are not valid UTF-8.
    fallback: &'static Encoding,
}

impl Default for TextDecoder {
    fn default() -> Self {
        Self {
            strict: None,
            fallback: encoding_rs::WINDOWS_1252,
        }
    }
}

impl TextDecoder {
    pub fn from_config(config: &Config) -> Result<Self> {
        let strict = config.encoding.as_deref().map(resolve).transpose()?;
        let fallback = resolve(&config.fallback_encoding)?;
        Ok(Self { strict, fallback })
    }

    pub fn strict(label: &str) -> Result<Self> {
        Ok(Self {
            strict: Some(resolve(label)?),
            ..Self::default()
        })
    }

    /// Name of the encoding that will be tried first.
    pub fn primary_name(&self) -> &'static str {
        self.strict.unwrap_or(UTF_8).name()
    }

    /// Decode `bytes`. Returns `None` only in strict mode, for malformed input.
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Option<Cow<'a, str>> {
        match self.strict {
            Some(encoding) => {
                let (text, had_errors) = encoding.decode_with_bom_removal(bytes);
                (!had_errors).then_some(text)
            }
            None => {
                let (text, had_errors) = UTF_8.decode_with_bom_removal(bytes);
                if !had_errors {
                    return Some(text);
                }
                let (text, _, _) = self.fallback.decode(bytes);
                Some(text)
            }
        }
    }
}

fn resolve(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| PipelineError::Config(format!("unknown encoding label {:?}", label)))
}
