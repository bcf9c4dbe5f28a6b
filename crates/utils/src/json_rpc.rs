// This file is part of Chainrelay.
//
// Chainrelay is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// Chainrelay is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with Chainrelay.
// If not, see https://www.gnu.org/licenses/.

//! JSON-RPC utilities

/// The error code for internal errors in JSON-RPC responses
pub const INTERNAL_ERROR_CODE: i64 = -32603;

/// The error code for unknown or unavailable methods
pub const METHOD_NOT_FOUND_CODE: i64 = -32601;

/// Message returned when the endpoint refuses a method (HTTP 405)
pub const METHOD_NOT_FOUND_MESSAGE: &str = "The method does not exist / is not available.";

/// Message returned when the endpoint rate limits us (HTTP 429)
pub const RATE_LIMITED_MESSAGE: &str = "Request is being rate limited.";

/// Message returned when the endpoint's gateway times out (HTTP 503/504)
pub const GATEWAY_TIMEOUT_MESSAGE: &str = "Gateway timeout. The request took too long to process. \
     This can happen when querying logs over too wide a block range.";

/// Sentinel some nodes return in place of `null` for missing data
pub const NIL_SENTINEL: &str = "<nil>";
