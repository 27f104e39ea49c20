use bytes::Bytes;

use super::form::FormField;

/// One transfer to submit. Without a body or form it is a GET.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub url: String,
    /// Count body bytes but never store them.
    pub discard_body: bool,
    /// Multipart sections, in order. Wins over `body` when both are set.
    pub form: Vec<FormField>,
    /// Raw POST body.
    pub body: Option<Bytes>,
}

pub(crate) enum Payload<'a> {
    Empty,
    Form(&'a [FormField]),
    Raw(&'a Bytes),
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn discard_body(mut self, discard: bool) -> Self {
        self.discard_body = discard;
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn form(mut self, fields: Vec<FormField>) -> Self {
        self.form = fields;
        self
    }

    pub(crate) fn payload(&self) -> Payload<'_> {
        if !self.form.is_empty() {
            Payload::Form(&self.form)
        } else if let Some(body) = &self.body {
            Payload::Raw(body)
        } else {
            Payload::Empty
        }
    }
}
