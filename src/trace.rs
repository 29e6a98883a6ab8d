cfg_if::cfg_if! {
    if #[cfg(feature = "tracing")] {
        macro_rules! debug {
            ($($arg:tt)*) => { tracing::debug!(target: "evac_map", $($arg)*) };
        }

        macro_rules! trace {
            ($($arg:tt)*) => { tracing::trace!(target: "evac_map", $($arg)*) };
        }
    } else {
        macro_rules! debug {
            ($($arg:tt)*) => {{}};
        }

        macro_rules! trace {
            ($($arg:tt)*) => {{}};
        }
    }
}

pub(crate) use debug;
pub(crate) use trace;
