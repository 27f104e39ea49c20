// Multipart form fields and their encoding into a driver-side form.

use std::path::PathBuf;

use bytes::Bytes;
use curl::easy::Form;

use crate::config::MAX_FORM_OPTIONS;
use crate::error::SubmitError;

/// One multipart section. Each recognized key is encoded in order: name,
/// contents (with its length), file, content type, filename.
#[derive(Debug, Clone, Default)]
pub struct FormField {
    pub name: Option<String>,
    pub contents: Option<Bytes>,
    pub file: Option<PathBuf>,
    pub content_type: Option<String>,
    pub filename: Option<String>,
}

impl FormField {
    pub fn text(name: impl Into<String>, contents: impl Into<Bytes>) -> Self {
        Self {
            name: Some(name.into()),
            contents: Some(contents.into()),
            ..Self::default()
        }
    }

    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: Some(name.into()),
            file: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Number of driver sub-options this field encodes to, terminator included.
    pub fn encoded_options(&self) -> usize {
        let mut count = 1; // terminator
        if self.name.is_some() {
            count += 1;
        }
        if self.contents.is_some() {
            count += 2; // contents + explicit length
        }
        if self.file.is_some() {
            count += 1;
        }
        if self.content_type.is_some() {
            count += 1;
        }
        if self.filename.is_some() {
            count += 1;
        }
        count
    }

    fn validate(&self, index: usize) -> Result<(), SubmitError> {
        let invalid = |reason| SubmitError::InvalidForm { index, reason };
        if self.name.as_deref().map_or(true, str::is_empty) {
            return Err(invalid("missing name"));
        }
        match (&self.contents, &self.file) {
            (Some(_), Some(_)) => return Err(invalid("contents and file are exclusive")),
            (None, None) => return Err(invalid("needs contents or file")),
            _ => {}
        }
        if self.encoded_options() > MAX_FORM_OPTIONS {
            return Err(invalid("too many sub-options"));
        }
        Ok(())
    }
}

/// Check every field, then encode them in order. Nothing is built when any
/// field is invalid.
pub fn build_form(fields: &[FormField]) -> Result<Form, SubmitError> {
    for (index, field) in fields.iter().enumerate() {
        field.validate(index)?;
    }

    let mut form = Form::new();
    for field in fields {
        let name = field.name.as_deref().unwrap_or_default();
        let mut part = form.part(name);
        if let Some(contents) = &field.contents {
            part.contents(contents);
        }
        if let Some(file) = &field.file {
            part.file(file);
        }
        if let Some(content_type) = &field.content_type {
            part.content_type(content_type);
        }
        if let Some(filename) = &field.filename {
            part.filename(filename);
        }
        part.add()?;
    }
    Ok(form)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_options_never_exceed_limit() {
        let full = FormField::text("a", "b")
            .with_content_type("text/plain")
            .with_filename("a.txt");
        assert_eq!(full.encoded_options(), 6);
        assert!(full.encoded_options() <= MAX_FORM_OPTIONS);
        assert_eq!(FormField::default().encoded_options(), 1);
    }

    #[test]
    fn test_missing_name_is_rejected() {
        let field = FormField {
            contents: Some(Bytes::from_static(b"x")),
            ..FormField::default()
        };
        let err = build_form(&[FormField::text("ok", "1"), field]).unwrap_err();
        assert!(matches!(err, SubmitError::InvalidForm { index: 1, .. }));
    }

    #[test]
    fn test_contents_and_file_are_exclusive() {
        let mut field = FormField::file("upload", "/tmp/x");
        field.contents = Some(Bytes::from_static(b"inline"));
        assert!(matches!(
            build_form(&[field]),
            Err(SubmitError::InvalidForm { index: 0, .. })
        ));
        assert!(matches!(
            build_form(&[FormField {
                name: Some("empty".into()),
                ..FormField::default()
            }]),
            Err(SubmitError::InvalidForm { index: 0, .. })
        ));
    }

    #[test]
    fn test_valid_fields_build() {
        let fields = [
            FormField::text("greeting", "hello").with_content_type("text/plain"),
            FormField::text("blob", vec![0u8, 1, 2]).with_filename("blob.bin"),
        ];
        assert!(build_form(&fields).is_ok());
    }
}
