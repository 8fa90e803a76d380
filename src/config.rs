use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Optional binary-format features.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Proposal {
    ImportExportMutGlobals = 0,
    NonTrapFloatToIntConversions = 1,
    SignExtensionOperators = 2,
    MultiValue = 3,
    BulkMemoryOperations = 4,
    ReferenceTypes = 5,
    Simd = 6,
}

impl Proposal {
    pub const ALL: [Proposal; 7] = [
        Proposal::ImportExportMutGlobals,
        Proposal::NonTrapFloatToIntConversions,
        Proposal::SignExtensionOperators,
        Proposal::MultiValue,
        Proposal::BulkMemoryOperations,
        Proposal::ReferenceTypes,
        Proposal::Simd,
    ];

    pub fn from_u32(code: u32) -> Option<Self> { Self::ALL.get(code as usize).copied() }
}

/// Built-in host modules a VM can register on construction.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostRegistration {
    Wasi = 0,
    Process = 1,
}

impl HostRegistration {
    pub const ALL: [HostRegistration; 2] = [HostRegistration::Wasi, HostRegistration::Process];

    pub fn from_u32(code: u32) -> Option<Self> { Self::ALL.get(code as usize).copied() }
}

/// VM configuration. A VM borrows it for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configure {
    proposals: BTreeSet<Proposal>,
    host_registrations: BTreeSet<HostRegistration>,
    max_memory_page: u32,
}

impl Default for Configure {
    fn default() -> Self {
        Self {
            proposals: [
                Proposal::ImportExportMutGlobals,
                Proposal::NonTrapFloatToIntConversions,
                Proposal::SignExtensionOperators,
                Proposal::MultiValue,
            ]
            .into_iter()
            .collect(),
            host_registrations: BTreeSet::new(),
            max_memory_page: Self::DEFAULT_MAX_MEMORY_PAGE,
        }
    }
}

impl Configure {
    /// 65536 pages of 64 KiB, the full 32-bit address space.
    pub const DEFAULT_MAX_MEMORY_PAGE: u32 = 65536;

    pub fn new() -> Self { Self::default() }

    pub fn add_proposal(&mut self, p: Proposal) { self.proposals.insert(p); }
    pub fn remove_proposal(&mut self, p: Proposal) { self.proposals.remove(&p); }
    pub fn has_proposal(&self, p: Proposal) -> bool { self.proposals.contains(&p) }
    pub fn proposals(&self) -> impl Iterator<Item = Proposal> + '_ { self.proposals.iter().copied() }

    pub fn add_host_registration(&mut self, h: HostRegistration) { self.host_registrations.insert(h); }
    pub fn remove_host_registration(&mut self, h: HostRegistration) { self.host_registrations.remove(&h); }
    pub fn has_host_registration(&self, h: HostRegistration) -> bool { self.host_registrations.contains(&h) }
    pub fn host_registrations(&self) -> impl Iterator<Item = HostRegistration> + '_ {
        self.host_registrations.iter().copied()
    }

    pub fn set_max_memory_page(&mut self, pages: u32) { self.max_memory_page = pages; }
    pub fn max_memory_page(&self) -> u32 { self.max_memory_page }
}
