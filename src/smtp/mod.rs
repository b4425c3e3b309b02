// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

//! SMTP protocol engine

pub mod framer;
pub mod proto;
pub mod reply;
pub mod sasl;
pub mod server;
pub mod syntax;
