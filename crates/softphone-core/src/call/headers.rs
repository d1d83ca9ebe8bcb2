//! Header lookup on the INVITE that created an incoming call

use rsip::prelude::HasHeaders;
use tracing::debug;

/// Find the first header named `name` (case-insensitive) in a raw SIP message
///
/// Compact header forms are matched by their full name (`f:` is found as `From`).
pub(crate) fn find_header(raw_message: &str, name: &str) -> Option<String> {
    let name = name.trim();
    if name.is_empty() || raw_message.is_empty() {
        return None;
    }

    let message = match rsip::SipMessage::try_from(raw_message) {
        Ok(message) => message,
        Err(e) => {
            debug!("Cannot inspect headers of unparseable SIP message: {}", e);
            return None;
        }
    };

    message.headers().iter().find_map(|header| match header {
        rsip::Header::Other(key, value) if key.trim().eq_ignore_ascii_case(name) => {
            Some(value.trim().to_string())
        }
        rsip::Header::Other(..) => None,
        typed => {
            let line = typed.to_string();
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        }
    })
}
