use anyhow::{anyhow, Context};
use chrono::Local;
use std::path::PathBuf;
use tracing::{info, warn};

/// CPU sampler for a whole proxy run. Started before the listener comes up,
/// reported once during shutdown; the report is a pprof flamegraph named
/// after the wall-clock start time.
pub struct CpuProfiler {
    guard: pprof::ProfilerGuard<'static>,
    profile_dir: PathBuf,
}

impl CpuProfiler {
    pub fn start(profile_dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let profile_dir = profile_dir.into();
        fs_err::create_dir_all(&profile_dir)
            .with_context(|| format!("create profile dir {profile_dir:?}"))?;
        let guard = pprof::ProfilerGuardBuilder::default()
            .blocklist(&["libc", "libgcc", "pthread", "vdso"])
            .build()
            .map_err(|e| anyhow!("CpuProfiler failed to start: {e:?}"))?;
        info!("CpuProfiler sampling, reports go to {profile_dir:?}");
        Ok(Self { guard, profile_dir })
    }

    /// Consumes the profiler and writes the flamegraph for everything sampled
    /// since [`CpuProfiler::start`].
    pub fn report(self) -> anyhow::Result<()> {
        let time_prefix = format!("{}", Local::now().format("%Y-%m-%d-%H-%M-%S"));
        let profile_svg = self
            .profile_dir
            .join(format!("rwsplit_cpu_{time_prefix}.svg"));
        match self.guard.report().build() {
            Ok(report) => {
                let file = fs_err::File::create(&profile_svg)?;
                report.flamegraph(file)?;
                info!("CpuProfiler saved report to {profile_svg:?}");
                Ok(())
            }
            Err(err) => {
                warn!("CpuProfiler failed to generate flamegraph: {err}");
                Err(anyhow!("flamegraph generation failed: {err}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #[test]
    pub fn test_date_time_format() {
        let now_date = chrono::Local::now();
        let formatted = format!("{}", now_date.format("%Y-%m-%d-%H-%M-%S"));
        assert!(!formatted.is_empty());
    }
}
