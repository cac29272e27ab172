//! Turns a completed handshake into one record per side.
use super::containers::{BannerStyle, ConnectionState, OutputRecord, Role, SideState};
use super::kexinit;
use super::utils::{banner_text, get_md5_hash, quote_literal};

/// Records for a completed handshake, client first.
///
/// A side whose KEXINIT does not decode produces no record; the other side is unaffected.
pub fn records(state: &ConnectionState, style: BannerStyle) -> Vec<OutputRecord> {
    [(Role::Client, &state.client), (Role::Server, &state.server)]
        .into_iter()
        .filter_map(|(role, side)| record(role, side, style))
        .collect()
}

fn record(role: Role, side: &SideState, style: BannerStyle) -> Option<OutputRecord> {
    let buffer = side.kexinit.as_deref()?;

    let fields = match kexinit::decode(buffer) {
        Ok(fields) => fields.canonical(),
        Err(err) => {
            log::warn!("Skipping {role} record: {err}");
            return None;
        }
    };

    let banner = banner_text(side.banner.as_deref().unwrap_or_default());
    let banner = match style {
        BannerStyle::Literal => quote_literal(&banner),
        BannerStyle::Raw => banner,
    };

    Some(OutputRecord {
        role,
        banner,
        fingerprint: get_md5_hash(&fields),
        fields,
    })
}
