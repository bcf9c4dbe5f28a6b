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

use std::{fmt::Debug, time::Duration};

use futures_util::{future::BoxFuture, FutureExt};

/// Environment capabilities used by the block tracker to schedule its polls.
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait Platform: Send + Sync + Debug {
    /// A future that completes after `duration`
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// [`Platform`] backed by the tokio timer
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioPlatform;

impl Platform for TokioPlatform {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed()
    }
}
