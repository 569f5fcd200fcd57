//! Pluggable expansion modules.
//!
//! Optional features (raw character access, firmware update, test reports
//! and the like) attach to the engine at runtime. Registration only queues a
//! module; it is initialized by the next reconciliation pass once a device
//! is enumerated, and removed by the pass after it is unregistered.

use alloc::{boxed::Box, vec::Vec};

use crate::{transport::RegisterAccess, DriverError};

/// The kinds of expansion module. At most one of each may be registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum ExpansionKind {
    CharDevice,
    FirmwareUpdater,
    TestReporting,
    Proximity,
    ActivePen,
    Gesture,
    Video,
    Debug,
}

/// Handle of a registered module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ExpansionId(usize);

impl ExpansionId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// What a module wants after handling an attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AttnOutcome {
    /// Keep receiving attentions.
    #[default]
    Continue,
    /// Stop receiving attentions and be removed on the next reconciliation
    /// pass, as if unregistered.
    Withdraw,
}

/// A module hooked into the engine's lifecycle.
///
/// Every hook runs under the report-cycle lock, so a module has the bus to
/// itself for the duration of the call.
pub trait ExpansionModule<B: RegisterAccess> {
    /// Attach to the device. On error the module stays pending and is
    /// retried on the next reconciliation pass.
    fn init(&mut self, bus: &mut B) -> Result<(), DriverError<B::BusError>>;

    /// Detach from the device.
    fn remove(&mut self, bus: &mut B);

    /// Called on every attention with the first interrupt status register.
    fn attn(&mut self, bus: &mut B, status: u8) -> AttnOutcome;

    /// Called after the engine has reset and re-enumerated the device.
    fn reset(&mut self, _bus: &mut B) {}
}

struct Entry<B: RegisterAccess> {
    kind: ExpansionKind,
    module: Box<dyn ExpansionModule<B>>,
    inserted: bool,
    withdrawn: bool,
}

/// Arena of registered modules.
pub struct ExpansionRegistry<B: RegisterAccess> {
    entries: Vec<Option<Entry<B>>>,
}

impl<B: RegisterAccess> Default for ExpansionRegistry<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: RegisterAccess> ExpansionRegistry<B> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn live(&self) -> impl Iterator<Item = (usize, &Entry<B>)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().filter(|e| !e.withdrawn).map(|e| (i, e)))
    }

    /// Queue `module` for insertion.
    pub fn register(
        &mut self,
        kind: ExpansionKind,
        module: Box<dyn ExpansionModule<B>>,
    ) -> Result<ExpansionId, DriverError<B::BusError>> {
        if self.live().any(|(_, e)| e.kind == kind) {
            return Err(DriverError::ExpansionRegistered(kind));
        }

        let entry = Entry {
            kind,
            module,
            inserted: false,
            withdrawn: false,
        };
        let index = match self.entries.iter().position(Option::is_none) {
            Some(free) => {
                self.entries[free] = Some(entry);
                free
            }
            None => {
                self.entries.push(Some(entry));
                self.entries.len() - 1
            }
        };
        debug!("expansion {:?} registered in slot {}", kind, index);
        Ok(ExpansionId(index))
    }

    /// Mark the module of `kind` for removal on the next reconciliation pass.
    pub fn unregister(&mut self, kind: ExpansionKind) -> Result<(), DriverError<B::BusError>> {
        let entry = self
            .entries
            .iter_mut()
            .flatten()
            .find(|e| e.kind == kind && !e.withdrawn)
            .ok_or(DriverError::ExpansionNotFound(kind))?;
        entry.withdrawn = true;
        Ok(())
    }

    /// Insert pending modules and remove withdrawn ones.
    ///
    /// Pending modules are only initialized while `device_ready` is set.
    pub fn reconcile(&mut self, bus: &mut B, device_ready: bool) {
        for slot in self.entries.iter_mut() {
            let Some(entry) = slot else {
                continue;
            };

            if entry.withdrawn {
                if entry.inserted {
                    entry.module.remove(bus);
                    info!("expansion {:?} removed", entry.kind);
                }
                *slot = None;
            } else if !entry.inserted && device_ready {
                match entry.module.init(bus) {
                    Ok(()) => {
                        entry.inserted = true;
                        info!("expansion {:?} inserted", entry.kind);
                    }
                    Err(_) => warn!("expansion {:?} failed to initialize", entry.kind),
                }
            }
        }
    }

    /// Hand an attention to every inserted module.
    pub fn attn(&mut self, bus: &mut B, status: u8) {
        for entry in self.entries.iter_mut().flatten() {
            if !entry.inserted || entry.withdrawn {
                continue;
            }
            if entry.module.attn(bus, status) == AttnOutcome::Withdraw {
                debug!("expansion {:?} withdrew itself", entry.kind);
                entry.withdrawn = true;
            }
        }
    }

    /// Tell every inserted module that the device was reset.
    pub fn reset_all(&mut self, bus: &mut B) {
        for entry in self.entries.iter_mut().flatten() {
            if entry.inserted && !entry.withdrawn {
                entry.module.reset(bus);
            }
        }
    }

    pub fn is_inserted(&self, kind: ExpansionKind) -> bool {
        self.live().any(|(_, e)| e.kind == kind && e.inserted)
    }

    pub fn id(&self, kind: ExpansionKind) -> Option<ExpansionId> {
        self.live()
            .find(|(_, e)| e.kind == kind)
            .map(|(i, _)| ExpansionId(i))
    }

    /// Number of registered modules not yet removed.
    pub fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<B: RegisterAccess> core::fmt::Debug for ExpansionRegistry<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().flatten().map(|e| (e.kind, e.inserted, e.withdrawn)))
            .finish()
    }
}
