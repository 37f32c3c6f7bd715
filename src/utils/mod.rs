// Copyright (c) 2025-2026 the codecrate contributors
// SPDX-License-Identifier: Apache-2.0

pub mod error;
pub mod formatting;
pub mod paths;
pub mod summary;
pub mod validation;
