/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0.  If a copy of the MPL was not distributed with this
 * file, you can obtain one at https://mozilla.org/MPL/2.0/.
 */

/*
 * Wire and configuration types shared between the gateway server and the
 * streamer tool.  Everything here is plain data: serde + schemars derives,
 * no I/O beyond secret file resolution at deserialisation time.
 */

pub mod config;
pub mod health;
pub mod sched;
pub mod transfer;
