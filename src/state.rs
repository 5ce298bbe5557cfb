use std::{
    cell::RefCell,
    collections::{TryReserveError, VecDeque},
    rc::Rc,
};

use bitflags::bitflags;

use crate::{
    backend::{Backend, Lifecycle},
    config::Config,
    handlers::{control::ControlEvent, seat::SeatContext},
    signal::{ListenerToken, Signal},
    surface::SurfaceContext,
};

bitflags! {
    /// Device classes, with the bit values used on the wire.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DeviceClass: u32 {
        const KEYBOARD = 1;
        const POINTER = 2;
        const TOUCH = 4;
    }
}

impl DeviceClass {
    /// Single-bit classes in wire order.
    pub const CLASSES: [DeviceClass; 3] = [DeviceClass::KEYBOARD, DeviceClass::POINTER, DeviceClass::TOUCH];

    /// Every single-bit class contained in `self`.
    pub fn classes(self) -> impl Iterator<Item = DeviceClass> {
        Self::CLASSES.into_iter().filter(move |class| self.contains(*class))
    }
}

/// Conditions the router absorbs and logs. None of them is fatal.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("no surface with id {0}")]
    UnknownSurface(u32),
    #[error("no seat named {0:?}")]
    UnknownSeat(String),
    #[error("surface {0} is already registered")]
    DuplicateSurface(u32),
    #[error("seat {0:?} is already registered")]
    DuplicateSeat(String),
    #[error("surface {surface} already accepts seat {seat:?}")]
    AlreadyAccepted { surface: u32, seat: String },
    #[error("surface {surface} does not accept seat {seat:?}")]
    NotAccepted { surface: u32, seat: String },
    #[error("failed to grow the {registry} registry")]
    OutOfMemory {
        registry: &'static str,
        #[source]
        source: TryReserveError,
    },
}

/// Routing state: seat and surface registries plus the bound management clients.
///
/// Every mutation happens from compositor callbacks on one thread; the
/// registries are only ever changed through the methods of this type.
pub struct InputRouting<B: Backend> {
    pub(crate) backend: B,
    pub(crate) config: Config,
    pub(crate) seats: Vec<SeatContext<B::Device>>,
    pub(crate) surfaces: Vec<SurfaceContext<B::LayoutSurface>>,
    pub(crate) clients: Signal<ControlEvent>,
    /// Lifecycle notifications received but not applied yet.
    pub(crate) pending: Rc<RefCell<VecDeque<Lifecycle<B::LayoutSurface>>>>,
    pub(crate) wiring: Option<ListenerToken>,
}

impl<B: Backend> InputRouting<B> {
    pub fn new(config: Config, backend: B) -> Self {
        Self {
            backend,
            config,
            seats: Vec::new(),
            surfaces: Vec::new(),
            clients: Signal::new(),
            pending: Rc::default(),
            wiring: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn seats(&self) -> impl Iterator<Item = &SeatContext<B::Device>> {
        self.seats.iter()
    }

    pub fn surfaces(&self) -> impl Iterator<Item = &SurfaceContext<B::LayoutSurface>> {
        self.surfaces.iter()
    }

    pub fn seat(&self, name: &str) -> Option<&SeatContext<B::Device>> {
        self.seats.iter().find(|seat| seat.name() == name)
    }

    pub fn surface(&self, id: u32) -> Option<&SurfaceContext<B::LayoutSurface>> {
        self.surfaces.iter().find(|surface| surface.id() == id)
    }

    /// The routing context whose native surface is `native`.
    pub fn surface_for_native(&self, native: &B::Surface) -> Option<&SurfaceContext<B::LayoutSurface>> {
        self.surfaces
            .iter()
            .find(|surface| self.backend.compositor_surface(surface.layout()).as_ref() == Some(native))
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Capabilities of a seat, derived from the devices the compositor exposes.
    pub fn capabilities(&self, seat: &str) -> DeviceClass {
        DeviceClass::CLASSES
            .into_iter()
            .filter(|class| self.backend.device(seat, *class).is_some())
            .collect()
    }

    pub(crate) fn seat_index(&self, name: &str) -> Result<usize, RoutingError> {
        self.seats
            .iter()
            .position(|seat| seat.name() == name)
            .ok_or_else(|| RoutingError::UnknownSeat(name.to_owned()))
    }

    pub(crate) fn surface_index(&self, id: u32) -> Result<usize, RoutingError> {
        self.surfaces
            .iter()
            .position(|surface| surface.id() == id)
            .ok_or(RoutingError::UnknownSurface(id))
    }

    pub(crate) fn native(&self, index: usize) -> Option<B::Surface> {
        self.backend.compositor_surface(self.surfaces[index].layout())
    }

    pub(crate) fn broadcast(&mut self, event: ControlEvent) {
        tracing::trace!(?event, clients = self.clients.len(), "broadcast");
        self.clients.emit(&event);
    }

    /// Sets or clears focus bits on one surface, broadcasting the change.
    pub(crate) fn update_focus(&mut self, index: usize, device: DeviceClass, enabled: bool) {
        let surface = &mut self.surfaces[index];
        surface.focus.set(device, enabled);
        let id = surface.id();
        tracing::debug!(surface = id, ?device, enabled, "input focus");
        self.broadcast(ControlEvent::InputFocus {
            surface: id,
            device,
            enabled,
        });
    }
}
