//! Pairing code: a QR code of the front's URL.
//!
//! Scanning it gives a phone the identity hostname and port in one step.
//! The identity is itself a pin on the root, so the phone can check the
//! chain it is shown against the name it scanned.

use lanpin_ca::Identity;
use qrcode::render::svg;
use qrcode::QrCode;
use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::{LanpinError, Result};

fn encode(uri: &str) -> Result<QrCode> {
    QrCode::new(uri.as_bytes()).map_err(|e| LanpinError::Pairing(e.to_string()))
}

/// Render the pairing SVG for `identity` and `port`.
pub fn render_svg(identity: &Identity, port: u16) -> Result<(String, String)> {
    let uri = identity.url(port);
    let image = encode(&uri)?
        .render::<svg::Color<'_>>()
        .min_dimensions(256, 256)
        .quiet_zone(true)
        .build();
    Ok((uri, image))
}

/// Write the pairing SVG to `sink` and return the encoded URI.
pub fn emit(identity: &Identity, port: u16, sink: &mut impl Write) -> Result<String> {
    let (uri, image) = render_svg(identity, port)?;
    sink.write_all(image.as_bytes())?;
    sink.flush()?;
    Ok(uri)
}

/// Write the pairing SVG to `path`, replacing any previous code atomically.
pub fn emit_to_file(identity: &Identity, port: u16, path: &Path) -> Result<String> {
    let (uri, image) = render_svg(identity, port)?;
    lanpin_ca::write_atomic(path, image.as_bytes(), false)?;
    info!(path = %path.display(), %uri, "pairing code written");
    Ok(uri)
}

/// Render the pairing code with block characters for a terminal.
pub fn render_terminal(identity: &Identity, port: u16) -> Result<String> {
    let code = encode(&identity.url(port))?;
    Ok(code
        .render()
        .dark_color('\u{2588}') // Full block
        .light_color(' ')
        .module_dimensions(2, 1)
        .quiet_zone(true)
        .build())
}
