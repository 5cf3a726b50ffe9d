//! Best-effort dispatch profiler.
//!
//! Samples a monotonic clock at every dispatch and attributes the elapsed
//! time to the previously executed ip of the current function. Call
//! records form a shadow stack; when it desynchronizes from real control
//! flow (a native callee threw past several frames at once), the profiler
//! purges itself and warns instead of corrupting the histograms.

use rustc_hash::FxHashMap;
use std::rc::Rc;
use std::time::Instant;

/// Per-ip accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IpStats {
    pub hits: u64,
    pub self_ns: u64,
    pub sub_call_ns: u64,
}

/// Per-function histogram keyed by ip.
#[derive(Debug, Default)]
pub struct FnStats {
    pub by_ip: FxHashMap<u32, IpStats>,
    pub calls: u64,
}

#[derive(Debug)]
struct ActiveCall {
    fn_name: Rc<str>,
    /// ip the next elapsed slice is attributed to.
    last_ip: u32,
    /// Time spent in callees, billed to `last_ip.sub_call_ns` on exit.
    sub_ns: u64,
    entered: Instant,
}

#[derive(Debug, Default)]
pub struct VmProfiler {
    stats: FxHashMap<Rc<str>, FnStats>,
    shadow: Vec<ActiveCall>,
    last_sample: Option<Instant>,
}

impl VmProfiler {
    pub fn new() -> VmProfiler {
        VmProfiler::default()
    }

    /// A compiled function was entered.
    pub fn enter_fn(&mut self, fn_name: &Rc<str>) {
        let now = Instant::now();
        self.settle(now);
        self.stats.entry(fn_name.clone()).or_default().calls += 1;
        self.shadow.push(ActiveCall {
            fn_name: fn_name.clone(),
            last_ip: 0,
            sub_ns: 0,
            entered: now,
        });
        self.last_sample = Some(now);
    }

    /// One dispatch at `ip` inside the current function.
    pub fn tick(&mut self, ip: u32) {
        let now = Instant::now();
        self.settle(now);
        if let Some(active) = self.shadow.last_mut() {
            active.last_ip = ip;
        }
        self.last_sample = Some(now);
    }

    /// The current function returned (or was unwound). Bills the call's
    /// self time minus measured sub-call time to the caller's active ip.
    pub fn exit_fn(&mut self, fn_name: &str) {
        let now = Instant::now();
        self.settle(now);
        match self.shadow.pop() {
            Some(active) if &*active.fn_name == fn_name => {
                let total = now.duration_since(active.entered).as_nanos() as u64;
                if let Some(caller) = self.shadow.last_mut() {
                    caller.sub_ns = caller.sub_ns.saturating_add(total);
                    let entry = self
                        .stats
                        .entry(caller.fn_name.clone())
                        .or_default()
                        .by_ip
                        .entry(caller.last_ip)
                        .or_default();
                    entry.sub_call_ns = entry.sub_call_ns.saturating_add(total);
                }
            }
            _ => self.purge_desynced(fn_name),
        }
        self.last_sample = Some(now);
    }

    /// Attribute time since the previous sample to the current call's
    /// active ip.
    fn settle(&mut self, now: Instant) {
        let Some(prev) = self.last_sample else {
            return;
        };
        let Some(active) = self.shadow.last() else {
            return;
        };
        let elapsed = now.duration_since(prev).as_nanos() as u64;
        let entry = self
            .stats
            .entry(active.fn_name.clone())
            .or_default()
            .by_ip
            .entry(active.last_ip)
            .or_default();
        entry.hits += 1;
        entry.self_ns = entry.self_ns.saturating_add(elapsed);
    }

    /// Measurement degraded; drop everything, keep executing.
    fn purge_desynced(&mut self, fn_name: &str) {
        log::warn!(
            "profiler shadow stack desynchronized at exit of '{fn_name}'; \
             profile data discarded"
        );
        self.stats.clear();
        self.shadow.clear();
        self.last_sample = None;
    }

    pub fn stats(&self) -> &FxHashMap<Rc<str>, FnStats> {
        &self.stats
    }

    pub fn depth(&self) -> usize {
        self.shadow.len()
    }
}
