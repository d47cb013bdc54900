use std::io::{stderr, Stderr};

pub(crate) type ProgressBar = pbr::ProgressBar<Stderr>;

/// Progress bar over the instances of one pass, if enabled.
pub(crate) fn pass_progress_bar(enabled: bool, n_instances: usize) -> Option<ProgressBar> {
    if enabled {
        let mut pb = ProgressBar::on(stderr(), n_instances as u64);
        pb.message("Instances ");
        Some(pb)
    } else {
        None
    }
}
