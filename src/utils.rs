use base64::{prelude::BASE64_STANDARD, Engine};
use bytes::{BufMut, Bytes, BytesMut};

/// Boundary token announced in the response `Content-Type`.
pub const BOUNDARY: &str = "--livestream";

/// `Content-Type` header value of the multipart stream response.
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=--livestream";

/// Build one multipart part: delimiter, part headers, then the raw frame.
pub fn multipart_part(mime_type: &str, frame: &[u8]) -> Bytes {
    let header = format!(
        "{}\nContent-Type: {}\nContent-length: {}\n\n",
        BOUNDARY,
        mime_type,
        frame.len()
    );
    let mut part = BytesMut::with_capacity(header.len() + frame.len());
    part.put_slice(header.as_bytes());
    part.put_slice(frame);
    part.freeze()
}

/// Encode a frame as a `data:` URI.
pub fn data_uri(mime_type: &str, frame: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, BASE64_STANDARD.encode(frame))
}
