// SPDX-FileCopyrightText: 2026 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

pub mod axml;
pub mod jar;
pub mod padding;
pub mod signing_block;
pub mod zip;
