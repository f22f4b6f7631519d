//! In-memory demo host: a small arrangement session.
//!
//! Stands in for the real host application's object model so the binary and
//! the integration tests have something stateful to drive. Every handler here
//! runs on the thread that calls [`crate::executor::Dispatcher::tick`].

use serde_json::Value;

use crate::protocol::{Params, Reply};
use crate::table::{ActionError, ActionTable, ParamsExt};

const MIN_BPM: f64 = 20.0;
const MAX_BPM: f64 = 999.0;
const DEFAULT_BPM: f64 = 120.0;
const DEFAULT_VOLUME: f64 = 0.85;

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub name: String,
    pub volume: f64,
    pub pan: f64,
    pub mute: bool,
}

impl Track {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            volume: DEFAULT_VOLUME,
            pan: 0.0,
            mute: false,
        }
    }

    fn info(&self, index: usize) -> Reply {
        Reply::ok()
            .with("track_index", index)
            .with("name", self.name.as_str())
            .with("volume", self.volume)
            .with("pan", self.pan)
            .with("mute", self.mute)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub tempo: f64,
    pub playing: bool,
    pub tracks: Vec<Track>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            tempo: DEFAULT_BPM,
            playing: false,
            tracks: Vec::new(),
        }
    }
}

impl Session {
    fn track_index(&self, params: &Params) -> Result<usize, ActionError> {
        let index = params.i64_or("track_index", 0)?;
        usize::try_from(index)
            .ok()
            .filter(|index| *index < self.tracks.len())
            .ok_or(ActionError::InvalidIndex {
                what: "track",
                index,
            })
    }
}

/// The session's full command surface.
pub fn action_table() -> ActionTable<Session> {
    ActionTable::new()
        .with("echo", echo)
        .with("get_session_info", get_session_info)
        .with("set_tempo", set_tempo)
        .with("start_playback", start_playback)
        .with("stop_playback", stop_playback)
        .with("create_track", create_track)
        .with("rename_track", rename_track)
        .with("set_track_volume", set_track_volume)
        .with("get_track_info", get_track_info)
        .with("delete_track", delete_track)
}

fn echo(_session: &mut Session, params: &Params) -> Result<Reply, ActionError> {
    let value = params.get("value").cloned().unwrap_or(Value::Null);
    Ok(Reply::ok().with("value", value))
}

fn get_session_info(session: &mut Session, _params: &Params) -> Result<Reply, ActionError> {
    Ok(Reply::ok()
        .with("is_playing", session.playing)
        .with("tempo", session.tempo)
        .with("num_tracks", session.tracks.len()))
}

fn set_tempo(session: &mut Session, params: &Params) -> Result<Reply, ActionError> {
    let bpm = params.f64_or("bpm", DEFAULT_BPM)?;
    if !(MIN_BPM..=MAX_BPM).contains(&bpm) {
        return Err(ActionError::validation(format!(
            "BPM must be between {MIN_BPM} and {MAX_BPM}"
        )));
    }
    session.tempo = bpm;
    Ok(Reply::ok().with("message", "Tempo set").with("bpm", bpm))
}

fn start_playback(session: &mut Session, _params: &Params) -> Result<Reply, ActionError> {
    session.playing = true;
    Ok(Reply::ok().with("message", "Playback started"))
}

fn stop_playback(session: &mut Session, _params: &Params) -> Result<Reply, ActionError> {
    session.playing = false;
    Ok(Reply::ok().with("message", "Playback stopped"))
}

fn create_track(session: &mut Session, params: &Params) -> Result<Reply, ActionError> {
    let index = session.tracks.len();
    let name = params
        .str_opt("name")?
        .map_or_else(|| format!("{} Track", index + 1), str::to_string);
    session.tracks.push(Track::new(name.clone()));
    Ok(Reply::ok()
        .with("message", "Track created")
        .with("track_index", index)
        .with("name", name))
}

fn rename_track(session: &mut Session, params: &Params) -> Result<Reply, ActionError> {
    let index = session.track_index(params)?;
    let name = params.require_str("name")?.to_string();
    session.tracks[index].name = name.clone();
    Ok(Reply::ok().with("message", "Track renamed").with("name", name))
}

fn set_track_volume(session: &mut Session, params: &Params) -> Result<Reply, ActionError> {
    let index = session.track_index(params)?;
    let volume = params.f64_or("volume", DEFAULT_VOLUME)?;
    if !(0.0..=1.0).contains(&volume) {
        return Err(ActionError::validation(
            "Volume must be between 0.0 and 1.0",
        ));
    }
    session.tracks[index].volume = volume;
    Ok(Reply::ok()
        .with("message", "Track volume set")
        .with("volume", volume))
}

fn get_track_info(session: &mut Session, params: &Params) -> Result<Reply, ActionError> {
    let index = session.track_index(params)?;
    Ok(session.tracks[index].info(index))
}

fn delete_track(session: &mut Session, params: &Params) -> Result<Reply, ActionError> {
    let index = session.track_index(params)?;
    let removed = session.tracks.remove(index);
    Ok(Reply::ok()
        .with("message", "Track deleted")
        .with("name", removed.name))
}
