use serde_json::Value;
use thiserror::Error;

use crate::{DataPart, FileObject, FilePart, FileRole, Part, RawPart, TextPart};

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("part is neither nested nor flattened: {0}")]
    UnrecognizedShape(String),
    #[error("file part missing uri and bytes")]
    FileWithoutContent,
    #[error("malformed part: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Ingress boundary for agent heterogeneity: some agents emit parts as
/// `{"root": {"kind": ...}}`, others flatten to `{"kind": ...}`. Everything
/// past this function sees only the normalized [`Part`] shape.
pub fn normalize_part(value: &Value) -> Result<Part, NormalizeError> {
    let raw: RawPart = if let Some(root) = value.get("root") {
        serde_json::from_value(root.clone())?
    } else if value.get("kind").is_some() {
        serde_json::from_value(value.clone())?
    } else {
        return Err(NormalizeError::UnrecognizedShape(
            serde_json::to_string(value).unwrap_or_default(),
        ));
    };
    raw_to_part(raw)
}

/// Normalize every part in a frame, skipping entries that fail to parse
/// (a malformed sibling must not poison the rest of the message).
pub fn normalize_parts(values: &[Value]) -> Vec<Part> {
    values.iter().filter_map(|v| normalize_part(v).ok()).collect()
}

fn raw_to_part(raw: RawPart) -> Result<Part, NormalizeError> {
    match raw {
        RawPart::Text { text } => Ok(Part::Text(TextPart { text })),
        RawPart::File { file } => file_to_part(file),
        RawPart::Data { data } => Ok(Part::Data(DataPart { payload: data })),
    }
}

fn file_to_part(file: FileObject) -> Result<Part, NormalizeError> {
    let uri = match (&file.uri, &file.bytes) {
        (Some(uri), _) => uri.clone(),
        // Inline bytes are resolved to an artifact URI by the transport
        // before dispatch; at this layer we carry them as a data: URI.
        (None, Some(bytes)) => format!(
            "data:{};base64,{}",
            file.mime_type.as_deref().unwrap_or("application/octet-stream"),
            bytes
        ),
        (None, None) => return Err(NormalizeError::FileWithoutContent),
    };
    let name = file
        .name
        .clone()
        .or_else(|| uri.rsplit('/').next().map(str::to_string))
        .unwrap_or_else(|| "file".to_string());
    Ok(Part::File(FilePart {
        name,
        uri,
        mime_type: file
            .mime_type
            .unwrap_or_else(|| "application/octet-stream".to_string()),
        role: FileRole::parse(file.role.as_deref()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_nested_shape() {
        let value = json!({"root": {"kind": "text", "text": "hi"}});
        let part = normalize_part(&value).unwrap();
        assert_eq!(part.as_text(), Some("hi"));
    }

    #[test]
    fn accepts_flattened_shape() {
        let value = json!({"kind": "file", "file": {
            "name": "a.png", "uri": "https://x/a.png", "mime_type": "image/png", "role": "mask"
        }});
        match normalize_part(&value).unwrap() {
            Part::File(f) => {
                assert_eq!(f.role, FileRole::Mask);
                assert_eq!(f.uri, "https://x/a.png");
            }
            other => panic!("expected file part, got {other:?}"),
        }
    }

    #[test]
    fn both_shapes_normalize_identically() {
        let nested = json!({"root": {"kind": "data", "data": {"k": 1}}});
        let flat = json!({"kind": "data", "data": {"k": 1}});
        assert_eq!(
            normalize_part(&nested).unwrap(),
            normalize_part(&flat).unwrap()
        );
    }

    #[test]
    fn malformed_sibling_does_not_poison_message() {
        let values = vec![
            json!({"kind": "text", "text": "keep"}),
            json!({"something": "else"}),
        ];
        let parts = normalize_parts(&values);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].as_text(), Some("keep"));
    }

    #[test]
    fn data_part_artifact_uri_is_surfaced() {
        let value = json!({"kind": "data", "data": {"artifact-uri": "https://blob/x"}});
        match normalize_part(&value).unwrap() {
            Part::Data(d) => assert_eq!(d.artifact_uri(), Some("https://blob/x")),
            other => panic!("expected data part, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_shape_is_rejected() {
        let value = json!({"neither": true});
        assert!(matches!(
            normalize_part(&value),
            Err(NormalizeError::UnrecognizedShape(_))
        ));
    }
}
