// 💾 JSON artifact helpers shared by models, preprocessors and the manifest

use crate::error::{PipelineError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

fn with_path(path: &Path, err: std::io::Error) -> PipelineError {
    PipelineError::Io(std::io::Error::new(
        err.kind(),
        format!("{}: {}", path.display(), err),
    ))
}

/// Write `value` as pretty JSON, creating parent directories
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| with_path(parent, e))?;
    }
    let file = File::create(path).map_err(|e| with_path(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush().map_err(|e| with_path(path, e))?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| with_path(path, e))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Decode a component's parameter block; null means all defaults
pub fn parse_params<T: DeserializeOwned + Default>(component: &str, params: &Value) -> Result<T> {
    if params.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(params.clone()).map_err(|e| {
        PipelineError::configuration(format!("invalid params for '{}': {}", component, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Default, PartialEq, Deserialize)]
    #[serde(default, deny_unknown_fields)]
    struct Params {
        epochs: usize,
    }

    #[test]
    fn test_parse_params() {
        assert_eq!(parse_params::<Params>("m", &Value::Null).unwrap(), Params::default());
        assert_eq!(
            parse_params::<Params>("m", &json!({"epochs": 3})).unwrap(),
            Params { epochs: 3 }
        );

        let err = parse_params::<Params>("m", &json!({"epoch": 3})).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
        assert!(err.to_string().contains("'m'"));
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = read_json::<Value>(Path::new("/nonexistent/artifact.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/artifact.json"));
    }
}
