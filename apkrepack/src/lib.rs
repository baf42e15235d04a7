// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

//! apkrepack turns a prebuilt template archive and a directory of web content
//! into a signed, installable application archive.
//!
//! The CLI is the stable interface. The library modules are public so that
//! other tools can drive [`pipeline::Pipeline`] directly, but their APIs can
//! change at any time.

pub mod cli;
pub mod config;
pub mod crypto;
pub mod format;
pub mod patch;
pub mod pipeline;
pub mod sign;
pub mod stream;
pub mod util;
