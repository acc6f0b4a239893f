// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;

use lofty::prelude::*;
use lofty::probe::Probe;
use tracing::warn;

/// Read the playing time of a local audio file, rounded to whole seconds.
///
/// Returns `None` when the file cannot be probed or reports no duration.
/// Blocking; run it off the async executor.
pub fn probe_duration(path: &Path) -> Option<u32> {
    match Probe::open(path).and_then(|probe| probe.read()) {
        Ok(tagged_file) => {
            let seconds = tagged_file.properties().duration().as_secs_f64().round();
            (seconds >= 1.0).then_some(seconds as u32)
        }
        Err(e) => {
            warn!(file = %path.display(), error = %e, "failed to read audio properties");
            None
        }
    }
}
