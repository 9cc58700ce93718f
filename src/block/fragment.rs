//! Single block of a logical payload.

use bytes::Bytes;

use super::options::BlockOptions;
use crate::message::ContentFormat;

/// One bounded-size slice of a logical payload plus its block metadata.
///
/// A fragment is either populated from payload bytes or created as an empty
/// placeholder awaiting arrival. The acknowledged flag is tri-state:
/// `None` until the peer's confirmation is known, then `Some(true)` once
/// this exact fragment has been confirmed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayloadFragment {
    payload: Option<Bytes>,
    content_format: Option<ContentFormat>,
    options: BlockOptions,
    acked: Option<bool>,
}

impl PayloadFragment {
    /// Fragment populated from a payload slice.
    #[must_use]
    pub const fn new(
        payload: Option<Bytes>,
        content_format: Option<ContentFormat>,
        options: BlockOptions,
    ) -> Self {
        Self {
            payload,
            content_format,
            options,
            acked: None,
        }
    }

    /// Fragment received from the peer, acknowledged on arrival.
    #[must_use]
    pub const fn received(
        payload: Option<Bytes>,
        content_format: Option<ContentFormat>,
        options: BlockOptions,
    ) -> Self {
        Self {
            payload,
            content_format,
            options,
            acked: Some(true),
        }
    }

    /// Empty placeholder for a block that has not arrived yet.
    #[must_use]
    pub const fn placeholder(options: BlockOptions) -> Self { Self::new(None, None, options) }

    /// Borrow the payload bytes, when present.
    #[must_use]
    pub const fn payload(&self) -> Option<&Bytes> { self.payload.as_ref() }

    /// Content format declared for this fragment.
    #[must_use]
    pub const fn content_format(&self) -> Option<ContentFormat> { self.content_format }

    /// The `(num, more, size)` triple describing this fragment.
    #[must_use]
    pub const fn options(&self) -> BlockOptions { self.options }

    /// Tri-state acknowledgement flag.
    #[must_use]
    pub const fn acked(&self) -> Option<bool> { self.acked }

    /// Record the peer's confirmation of this fragment.
    pub const fn set_acked(&mut self, acked: bool) { self.acked = Some(acked); }

    /// Byte content; empty when the fragment has not arrived.
    #[must_use]
    pub fn render(&self) -> &[u8] { self.payload.as_deref().unwrap_or(&[]) }
}
