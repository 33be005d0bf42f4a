// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod crash_tests;
pub mod retention_tests;
