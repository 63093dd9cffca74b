//! Stream URL selection for the player.

use url::Url;

use crate::jellyfin::{MediaSource, PlayMethod};

/// Inputs for building the URL the player opens.
#[derive(Debug, Clone)]
pub struct StreamRequest<'a> {
  pub server_url: &'a str,
  pub item_id: &'a str,
  pub token: &'a str,
  pub resume_ticks: i64,
  pub media_source_id: Option<&'a str>,
  pub play_session_id: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamUrl {
  pub url: String,
  pub play_method: PlayMethod,
}

/// Pick the stream URL: server direct stream, then transcoding, then the
/// static stream endpoint. Missing query parameters are filled in.
pub fn build_stream_url(
  req: &StreamRequest<'_>,
  source: Option<&MediaSource>,
) -> Result<StreamUrl, url::ParseError> {
  let base = req.server_url.trim_end_matches('/');
  let direct = source
    .and_then(|s| s.direct_stream_url.as_deref())
    .filter(|u| !u.is_empty());
  let transcoding = source
    .and_then(|s| s.transcoding_url.as_deref())
    .filter(|u| !u.is_empty());

  let (mut url, play_method) = match (direct, transcoding) {
    (Some(u), _) => (resolve(base, u)?, PlayMethod::DirectStream),
    (None, Some(u)) => (resolve(base, u)?, PlayMethod::Transcode),
    (None, None) => (
      Url::parse(&format!("{}/Videos/{}/stream?Static=true", base, req.item_id))?,
      PlayMethod::DirectStream,
    ),
  };

  let mut missing: Vec<(&str, String)> = Vec::new();
  if req.resume_ticks > 0 {
    missing.push(("StartTimeTicks", req.resume_ticks.to_string()));
  }
  if let Some(id) = req.media_source_id {
    missing.push(("MediaSourceId", id.to_string()));
  }
  if let Some(id) = req.play_session_id {
    missing.push(("PlaySessionId", id.to_string()));
  }
  if !req.token.is_empty() {
    missing.push(("api_key", req.token.to_string()));
    missing.push(("X-Emby-Token", req.token.to_string()));
  }

  let present: Vec<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
  missing.retain(|(key, _)| !present.iter().any(|p| p == key));
  if !missing.is_empty() {
    let mut pairs = url.query_pairs_mut();
    for (key, value) in &missing {
      pairs.append_pair(key, value);
    }
  }

  Ok(StreamUrl {
    url: url.into(),
    play_method,
  })
}

/// Server URLs may be absolute, rooted (`/Videos/...`), or relative to the base.
fn resolve(base: &str, candidate: &str) -> Result<Url, url::ParseError> {
  if candidate.starts_with('/') {
    return Url::parse(&format!("{}{}", base, candidate));
  }
  match Url::parse(candidate) {
    Ok(url) => Ok(url),
    Err(url::ParseError::RelativeUrlWithoutBase) => {
      Url::parse(&format!("{}/", base))?.join(candidate)
    }
    Err(e) => Err(e),
  }
}

/// Redact credentials from URLs for logging.
pub fn redact_url(url: &str) -> String {
  let mut out = url.to_string();
  for key in ["api_key=", "X-Emby-Token="] {
    if let Some(idx) = out.find(key) {
      let start = idx + key.len();
      let end = out[start..].find('&').map(|i| start + i).unwrap_or(out.len());
      out = format!("{}[REDACTED]{}", &out[..start], &out[end..]);
    }
  }
  out
}
