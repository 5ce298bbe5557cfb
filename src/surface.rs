use std::collections::BTreeSet;

use crate::{
    backend::Backend,
    handlers::control::ControlEvent,
    state::{DeviceClass, InputRouting, RoutingError},
};

/// Seat names allowed to route input to one surface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcceptanceList {
    seats: BTreeSet<String>,
}

impl AcceptanceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the seat was already present.
    pub fn insert(&mut self, seat: &str) -> bool {
        if self.seats.contains(seat) {
            return false;
        }
        self.seats.insert(seat.to_owned())
    }

    /// Returns `false` when the seat was absent.
    pub fn remove(&mut self, seat: &str) -> bool {
        self.seats.remove(seat)
    }

    pub fn contains(&self, seat: &str) -> bool {
        self.seats.contains(seat)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.seats.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.seats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }

    /// Whether both lists name at least one common seat.
    pub fn shares_seat_with(&self, other: &AcceptanceList) -> bool {
        self.seats.intersection(&other.seats).next().is_some()
    }
}

/// Routing state of one application surface.
#[derive(Debug, Clone)]
pub struct SurfaceContext<L> {
    id: u32,
    layout: L,
    pub(crate) focus: DeviceClass,
    pub(crate) accepted: AcceptanceList,
}

impl<L> SurfaceContext<L> {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn layout(&self) -> &L {
        &self.layout
    }

    pub fn focus(&self) -> DeviceClass {
        self.focus
    }

    pub fn accepted(&self) -> &AcceptanceList {
        &self.accepted
    }

    pub fn accepts(&self, seat: &str) -> bool {
        self.accepted.contains(seat)
    }

    /// Holds every bit of `class` and accepts `seat`.
    pub(crate) fn routes(&self, seat: &str, class: DeviceClass) -> bool {
        self.focus.contains(class) && self.accepts(seat)
    }
}

impl<B: Backend> InputRouting<B> {
    pub fn on_surface_created(&mut self, layout: B::LayoutSurface) {
        match self.try_add_surface(layout) {
            Ok(_) => {}
            Err(err @ RoutingError::OutOfMemory { .. }) => {
                tracing::error!(?err, "Failed to register surface");
            }
            Err(err) => tracing::warn!(%err, "Ignoring surface creation"),
        }
    }

    pub fn on_surface_destroyed(&mut self, layout: &B::LayoutSurface) {
        let id = self.backend.surface_id(layout);
        if let Err(err) = self.try_remove_surface(id) {
            tracing::warn!(%err, "Ignoring surface removal");
        }
    }

    pub(crate) fn try_add_surface(&mut self, layout: B::LayoutSurface) -> Result<u32, RoutingError> {
        let id = self.backend.surface_id(&layout);
        if self.surface(id).is_some() {
            return Err(RoutingError::DuplicateSurface(id));
        }
        self.surfaces
            .try_reserve(1)
            .map_err(|source| RoutingError::OutOfMemory {
                registry: "surface",
                source,
            })?;

        let mut accepted = AcceptanceList::new();
        accepted.insert(&self.config.default_seat);
        self.surfaces.push(SurfaceContext {
            id,
            layout,
            focus: DeviceClass::empty(),
            accepted,
        });
        tracing::info!(surface = id, "Surface added");

        let seat = self.config.default_seat.clone();
        self.broadcast(ControlEvent::InputAcceptance {
            surface: id,
            seat,
            accepted: true,
        });
        Ok(id)
    }

    pub(crate) fn try_remove_surface(&mut self, id: u32) -> Result<(), RoutingError> {
        let index = self.surface_index(id)?;
        let surface = self.surfaces.remove(index);
        for seat in self.seats.iter_mut() {
            if seat.forced_pointer_focus == Some(id) {
                tracing::debug!(seat = %seat.name(), surface = id, "Dropping forced pointer focus");
                seat.forced_pointer_focus = None;
            }
        }
        tracing::info!(surface = id, accepted = surface.accepted.len(), "Surface removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn insert_rejects_duplicates() {
        let mut list = AcceptanceList::new();
        assert!(list.insert("default"));
        assert!(!list.insert("default"));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn remove_absent_seat() {
        let mut list = AcceptanceList::new();
        list.insert("driver");
        assert!(!list.remove("passenger"));
        assert!(list.remove("driver"));
        assert!(list.is_empty());
    }

    #[test]
    fn shared_seats() {
        let mut a = AcceptanceList::new();
        let mut b = AcceptanceList::new();
        a.insert("driver");
        b.insert("passenger");
        assert!(!a.shares_seat_with(&b));
        b.insert("driver");
        assert!(a.shares_seat_with(&b));
    }

    proptest! {
        #[test]
        fn never_holds_a_name_twice(names in prop::collection::vec("[a-d]{1,2}", 0..32)) {
            let mut list = AcceptanceList::new();
            for name in &names {
                list.insert(name);
            }
            let listed: Vec<_> = list.iter().collect();
            let mut unique = listed.clone();
            unique.dedup();
            prop_assert_eq!(listed.len(), unique.len());
            for name in &names {
                prop_assert!(list.contains(name));
            }
        }
    }
}
