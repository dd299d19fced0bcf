//! NUMA topology oracle.
//!
//! The allocator itself never enumerates hardware; it asks an oracle to
//! translate application node indices into OS node identifiers and to name
//! the calling thread's current node. [`SystemTopology`] is the production
//! oracle, detected once per process using:
//!
//! 1. hwlocality (if the `hwloc` feature is enabled)
//! 2. sysfs parsing on Linux (`/sys/devices/system/node/`)
//! 3. `GetNumaHighestNodeNumber` on Windows
//! 4. Single-node fallback on other platforms
//!
//! Detection never fails; it degrades to a single node 0.

use std::sync::OnceLock;

/// Translates application NUMA indices to OS identifiers.
///
/// Application indices are dense (`0..num_nodes`); OS identifiers may be
/// sparse when nodes are offline. `None` signals an index the system cannot
/// resolve.
pub trait TopologyOracle: Send + Sync {
    /// OS node identifier for a zero-based application node index.
    fn os_node_for(&self, index: u32) -> Option<u32>;

    /// OS node identifier backing the calling thread's current CPU.
    fn current_os_node(&self) -> Option<u32>;

    /// Number of NUMA nodes visible to the application.
    fn num_nodes(&self) -> usize;
}

/// Detected system topology.
#[derive(Debug, Clone)]
pub struct SystemTopology {
    /// Application index → OS node id (sorted, possibly sparse ids)
    os_nodes: Vec<u32>,
    /// CPU id → OS node id
    cpu_to_node: Vec<u32>,
}

impl SystemTopology {
    /// Detect the system's NUMA topology using the best available method.
    #[must_use]
    pub fn detect() -> Self {
        #[cfg(feature = "hwloc")]
        {
            if let Some(topo) = Self::detect_hwloc() {
                return topo;
            }
        }

        #[cfg(target_os = "linux")]
        {
            if let Some(topo) = Self::detect_sysfs() {
                return topo;
            }
        }

        #[cfg(target_os = "windows")]
        {
            if let Some(topo) = Self::detect_windows() {
                return topo;
            }
        }

        Self::single_node_fallback()
    }

    /// Detect node and CPU layout via hwlocality.
    #[cfg(feature = "hwloc")]
    fn detect_hwloc() -> Option<Self> {
        use hwlocality::object::types::ObjectType;
        use hwlocality::Topology;

        let topology = Topology::new().ok()?;

        let mut os_nodes: Vec<u32> = topology
            .objects_with_type(ObjectType::NUMANode)
            .filter_map(|node| node.os_index())
            .map(|idx| u32::try_from(idx).ok())
            .collect::<Option<Vec<_>>>()?;

        if os_nodes.is_empty() {
            return None;
        }
        os_nodes.sort_unstable();

        let num_cpus = topology.objects_with_type(ObjectType::PU).count();
        let mut cpu_to_node = vec![os_nodes[0]; num_cpus];

        for node in topology.objects_with_type(ObjectType::NUMANode) {
            let Some(os_index) = node.os_index().and_then(|i| u32::try_from(i).ok()) else {
                continue;
            };
            if let Some(cpuset) = node.cpuset() {
                for cpu in cpuset.iter_set() {
                    let cpu = usize::from(cpu);
                    if cpu < cpu_to_node.len() {
                        cpu_to_node[cpu] = os_index;
                    }
                }
            }
        }

        Some(Self { os_nodes, cpu_to_node })
    }

    /// Detect node and CPU layout from sysfs.
    #[cfg(target_os = "linux")]
    fn detect_sysfs() -> Option<Self> {
        use std::fs;
        use std::path::Path;

        let node_root = Path::new("/sys/devices/system/node");
        let mut os_nodes: Vec<u32> = Vec::new();

        for entry in fs::read_dir(node_root).ok()? {
            let entry = entry.ok()?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(id) = name.strip_prefix("node").and_then(|s| s.parse::<u32>().ok()) {
                os_nodes.push(id);
            }
        }

        if os_nodes.is_empty() {
            return None;
        }
        os_nodes.sort_unstable();

        let num_cpus = Self::online_cpu_count();
        let mut cpu_to_node = vec![os_nodes[0]; num_cpus];

        for node_id in &os_nodes {
            let cpulist = node_root.join(format!("node{node_id}")).join("cpulist");
            if let Ok(list) = fs::read_to_string(&cpulist) {
                for cpu in Self::parse_cpulist(list.trim()) {
                    if cpu < cpu_to_node.len() {
                        cpu_to_node[cpu] = *node_id;
                    }
                }
            }
        }

        Some(Self { os_nodes, cpu_to_node })
    }

    /// Count online CPUs, preferring sysfs over the process CPU count.
    #[cfg(target_os = "linux")]
    fn online_cpu_count() -> usize {
        if let Ok(online) = std::fs::read_to_string("/sys/devices/system/cpu/online") {
            if let Some(max) = Self::parse_cpulist(online.trim()).into_iter().max() {
                return max + 1;
            }
        }
        num_cpus::get()
    }

    /// Parse a CPU list string like `0-7,16-23`.
    #[cfg(target_os = "linux")]
    fn parse_cpulist(s: &str) -> Vec<usize> {
        let mut cpus = Vec::new();

        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if let Some((start, end)) = part.split_once('-') {
                if let (Ok(start), Ok(end)) = (start.parse::<usize>(), end.parse::<usize>()) {
                    cpus.extend(start..=end);
                }
            } else if let Ok(cpu) = part.parse::<usize>() {
                cpus.push(cpu);
            }
        }

        cpus
    }

    /// Enumerate nodes via the Windows NUMA API.
    #[cfg(target_os = "windows")]
    fn detect_windows() -> Option<Self> {
        use windows::Win32::System::SystemInformation::GetNumaHighestNodeNumber;

        let mut highest: u32 = 0;
        // SAFETY: out-pointer call with a valid local.
        unsafe { GetNumaHighestNodeNumber(&mut highest).ok()? };

        Some(Self {
            os_nodes: (0..=highest).collect(),
            cpu_to_node: Vec::new(),
        })
    }

    /// Single-node topology for platforms without NUMA visibility.
    fn single_node_fallback() -> Self {
        Self {
            os_nodes: vec![0],
            cpu_to_node: vec![0; num_cpus::get()],
        }
    }

    /// OS node id of the CPU executing the caller.
    fn current_cpu_node(&self) -> Option<u32> {
        #[cfg(target_os = "linux")]
        {
            // SAFETY: sched_getcpu has no preconditions.
            let cpu = unsafe { libc::sched_getcpu() };
            if cpu < 0 {
                return None;
            }
            #[allow(clippy::cast_sign_loss)]
            return self.cpu_to_node.get(cpu as usize).copied();
        }

        #[cfg(target_os = "windows")]
        {
            use windows::Win32::System::Kernel::PROCESSOR_NUMBER;
            use windows::Win32::System::SystemInformation::GetNumaProcessorNodeEx;
            use windows::Win32::System::Threading::GetCurrentProcessorNumberEx;

            let mut processor = PROCESSOR_NUMBER::default();
            // SAFETY: out-pointer calls with valid locals.
            unsafe {
                GetCurrentProcessorNumberEx(&mut processor);
                let mut node: u16 = 0;
                GetNumaProcessorNodeEx(&processor, &mut node).ok()?;
                return Some(u32::from(node));
            }
        }

        #[cfg(not(any(target_os = "linux", target_os = "windows")))]
        {
            let _ = self;
            Some(0)
        }
    }

    /// One-line description of the detected layout.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} NUMA node(s), OS ids {:?}, {} CPU(s) mapped",
            self.os_nodes.len(),
            self.os_nodes,
            self.cpu_to_node.len()
        )
    }
}

impl TopologyOracle for SystemTopology {
    fn os_node_for(&self, index: u32) -> Option<u32> {
        self.os_nodes.get(index as usize).copied()
    }

    fn current_os_node(&self) -> Option<u32> {
        self.current_cpu_node()
    }

    fn num_nodes(&self) -> usize {
        self.os_nodes.len()
    }
}

/// Process-wide topology, detected on first use.
pub(crate) fn system() -> &'static SystemTopology {
    static TOPOLOGY: OnceLock<SystemTopology> = OnceLock::new();
    TOPOLOGY.get_or_init(|| {
        let topo = SystemTopology::detect();
        tracing::debug!(topology = %topo.summary(), "detected NUMA topology");
        topo
    })
}
