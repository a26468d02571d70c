// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Remote control over TCP.
//!
//! A client is greeted with `HELLO<TAB><nonce>` and must answer with the hex
//! MD5 of the nonce followed by the shared secret. After that every line is a
//! command answered by exactly one `OK` or `ERR` line (`GET-TRACKS` precedes
//! it with `RSP` lines). Catalog, sync and player events reach every
//! authenticated client as `NFY` lines.

mod command;
mod protocol;
mod server;

pub use command::{Command, CommandError, TrackField};
pub use protocol::{
    GREETING, NONCE_LEN, episode_state, expected_response, make_line, notification,
    verify_response,
};
pub use server::{ClientHub, RemoteServer, RemoteSettings};
