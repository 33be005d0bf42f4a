// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Operator tooling over a changelog directory.

pub mod commands;
