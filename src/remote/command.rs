// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::player::VolumeChange;

/// Episode fields a client may overwrite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackField {
    Priority,
    Emoji,
    Title,
    Artist,
}

impl TrackField {
    pub fn command_name(self) -> &'static str {
        match self {
            Self::Priority => "SET-TRACK-PRIORITY",
            Self::Emoji => "SET-TRACK-EMOJI",
            Self::Title => "SET-TRACK-TITLE",
            Self::Artist => "SET-TRACK-ARTIST",
        }
    }
}

/// A remote control command, decoded from one tab-delimited line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Play,
    Pause,
    SkipForward,
    SkipBack,
    SkipToTrackStart,
    SkipToTrackEnd,
    GetTracks,
    GetTrack {
        ident: String,
    },
    GetStatus,
    DownloadTracks {
        force: bool,
        max: Option<usize>,
        then_start: bool,
    },
    DownloadTrack {
        ident: String,
    },
    SetTrackField {
        field: TrackField,
        value: String,
        ident: String,
    },
    MoveToTop {
        ident: String,
    },
    DeleteFinishedTracks,
    DeleteTrack {
        ident: String,
    },
    SelectTrack {
        ident: String,
    },
    Seek {
        ident: String,
        position_ms: u64,
    },
    SetVolume(VolumeChange),
    /// Every field of the line, `ECHO` included
    Echo {
        fields: Vec<String>,
    },
    Bye,
}

/// Why a line could not be decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command, wrong arity or unparsable argument
    Invalid {
        name: String,
        field_count: usize,
        line: String,
    },
    /// `SET-VOLUME` with something other than `UP`, `DOWN` or `SAME`
    BadArgument { name: &'static str, arg: String },
}

impl Command {
    /// Decode one line. A blank line decodes to `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        if line.is_empty() {
            return Ok(None);
        }

        let fields: Vec<&str> = line.split('\t').collect();
        let invalid = || CommandError::Invalid {
            name: fields[0].to_string(),
            field_count: fields.len(),
            line: line.to_string(),
        };
        let owned = |s: &&str| s.to_string();

        let command = match fields.as_slice() {
            ["PLAY"] => Self::Play,
            ["PAUSE"] => Self::Pause,
            ["SKIP-FORWARD"] => Self::SkipForward,
            ["SKIP-BACK"] => Self::SkipBack,
            ["SKIP-TO-TRACK-START"] => Self::SkipToTrackStart,
            ["SKIP-TO-TRACK-END"] => Self::SkipToTrackEnd,
            ["GET-TRACKS"] => Self::GetTracks,
            ["GET-TRACK", ident] => Self::GetTrack {
                ident: owned(ident),
            },
            ["GET-STATUS"] => Self::GetStatus,
            ["DOWNLOAD-TRACKS", args @ ..] if args.len() <= 3 => {
                parse_download_tracks(args).ok_or_else(invalid)?
            }
            ["DOWNLOAD-TRACK", ident] => Self::DownloadTrack {
                ident: owned(ident),
            },
            ["SET-TRACK-PRIORITY", value, ident] => set_field(TrackField::Priority, value, ident),
            ["SET-TRACK-EMOJI", value, ident] => set_field(TrackField::Emoji, value, ident),
            ["SET-TRACK-TITLE", value, ident] => set_field(TrackField::Title, value, ident),
            ["SET-TRACK-ARTIST", value, ident] => set_field(TrackField::Artist, value, ident),
            ["MOVE-TO-TOP", ident] => Self::MoveToTop {
                ident: owned(ident),
            },
            ["DELETE-FINISHED-TRACKS"] => Self::DeleteFinishedTracks,
            ["DELETE-TRACK", ident] => Self::DeleteTrack {
                ident: owned(ident),
            },
            ["SELECT-TRACK", ident] => Self::SelectTrack {
                ident: owned(ident),
            },
            ["SEEK", ident, position] => Self::Seek {
                ident: owned(ident),
                position_ms: position.parse().map_err(|_| invalid())?,
            },
            ["SET-VOLUME", arg] => match arg.parse() {
                Ok(change) => Self::SetVolume(change),
                Err(()) => {
                    return Err(CommandError::BadArgument {
                        name: "SET-VOLUME",
                        arg: owned(arg),
                    });
                }
            },
            ["ECHO", ..] => Self::Echo {
                fields: fields.iter().map(owned).collect(),
            },
            ["BYE"] => Self::Bye,
            _ => return Err(invalid()),
        };

        Ok(Some(command))
    }
}

fn set_field(field: TrackField, value: &str, ident: &str) -> Command {
    Command::SetTrackField {
        field,
        value: value.to_string(),
        ident: ident.to_string(),
    }
}

/// `[force[<TAB>max[<TAB>then-start]]]`; a negative max means no cap
fn parse_download_tracks(args: &[&str]) -> Option<Command> {
    let force = args.first().is_some_and(|s| parse_flag(s));
    let max = match args.get(1) {
        Some(s) => {
            let max: i64 = s.parse().ok()?;
            usize::try_from(max).ok()
        }
        None => None,
    };
    let then_start = args.get(2).is_some_and(|s| parse_flag(s));

    Some(Command::DownloadTracks {
        force,
        max,
        then_start,
    })
}

fn parse_flag(s: &str) -> bool {
    s.eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Command {
        Command::parse(line).unwrap().unwrap()
    }

    #[test]
    fn parses_transport_commands() {
        assert_eq!(parse("PLAY"), Command::Play);
        assert_eq!(parse("SKIP-TO-TRACK-END"), Command::SkipToTrackEnd);
        assert_eq!(parse("BYE"), Command::Bye);
    }

    #[test]
    fn blank_line_is_ignored() {
        assert_eq!(Command::parse(""), Ok(None));
    }

    #[test]
    fn wrong_arity_is_invalid() {
        assert_eq!(
            Command::parse("PLAY\tnow"),
            Err(CommandError::Invalid {
                name: "PLAY".to_string(),
                field_count: 2,
                line: "PLAY\tnow".to_string(),
            })
        );
        assert!(Command::parse("GET-TRACK").is_err());
        assert!(Command::parse("DOWNLOAD-TRACKS\ttrue\t1\ttrue\textra").is_err());
    }

    #[test]
    fn unknown_command_is_invalid() {
        assert!(matches!(
            Command::parse("DANCE\tfast"),
            Err(CommandError::Invalid { name, field_count: 2, .. }) if name == "DANCE"
        ));
    }

    #[test]
    fn set_track_field_takes_value_then_ident() {
        assert_eq!(
            parse("SET-TRACK-PRIORITY\tA0\tep-1"),
            Command::SetTrackField {
                field: TrackField::Priority,
                value: "A0".to_string(),
                ident: "ep-1".to_string(),
            }
        );
        assert_eq!(
            parse("SET-TRACK-EMOJI\t\tep-1"),
            Command::SetTrackField {
                field: TrackField::Emoji,
                value: String::new(),
                ident: "ep-1".to_string(),
            }
        );
    }

    #[test]
    fn download_tracks_defaults_and_arguments() {
        assert_eq!(
            parse("DOWNLOAD-TRACKS"),
            Command::DownloadTracks {
                force: false,
                max: None,
                then_start: false
            }
        );
        assert_eq!(
            parse("DOWNLOAD-TRACKS\tTrue\t2\ttrue"),
            Command::DownloadTracks {
                force: true,
                max: Some(2),
                then_start: true
            }
        );
        assert_eq!(
            parse("DOWNLOAD-TRACKS\tfalse\t-1"),
            Command::DownloadTracks {
                force: false,
                max: None,
                then_start: false
            }
        );
        assert!(Command::parse("DOWNLOAD-TRACKS\ttrue\tmany").is_err());
    }

    #[test]
    fn seek_needs_numeric_position() {
        assert_eq!(
            parse("SEEK\tep\t1500"),
            Command::Seek {
                ident: "ep".to_string(),
                position_ms: 1500
            }
        );
        assert!(Command::parse("SEEK\tep\tlater").is_err());
    }

    #[test]
    fn set_volume_rejects_unknown_direction() {
        assert_eq!(parse("SET-VOLUME\tDOWN"), Command::SetVolume(VolumeChange::Down));
        assert_eq!(
            Command::parse("SET-VOLUME\tLOUD"),
            Err(CommandError::BadArgument {
                name: "SET-VOLUME",
                arg: "LOUD".to_string()
            })
        );
    }

    #[test]
    fn echo_keeps_all_fields() {
        assert_eq!(
            parse("ECHO\thello\tworld"),
            Command::Echo {
                fields: vec!["ECHO".to_string(), "hello".to_string(), "world".to_string()]
            }
        );
        assert_eq!(
            parse("ECHO"),
            Command::Echo {
                fields: vec!["ECHO".to_string()]
            }
        );
    }
}
