use crate::{
    backend::Backend,
    handlers::control::ControlEvent,
    state::{DeviceClass, InputRouting, RoutingError},
};

/// A routing grab installed on one device of a seat.
///
/// The device is held by identity: a grab is reinstalled only when the seat
/// exposes a different device object for the class.
#[derive(Debug, Clone, PartialEq)]
pub enum Grab<D> {
    Keyboard(D),
    Pointer(D),
    Touch(D),
}

impl<D> Grab<D> {
    /// `None` unless `class` is exactly one device class.
    pub fn for_class(class: DeviceClass, device: D) -> Option<Self> {
        if class == DeviceClass::KEYBOARD {
            Some(Grab::Keyboard(device))
        } else if class == DeviceClass::POINTER {
            Some(Grab::Pointer(device))
        } else if class == DeviceClass::TOUCH {
            Some(Grab::Touch(device))
        } else {
            None
        }
    }

    pub fn class(&self) -> DeviceClass {
        match self {
            Grab::Keyboard(_) => DeviceClass::KEYBOARD,
            Grab::Pointer(_) => DeviceClass::POINTER,
            Grab::Touch(_) => DeviceClass::TOUCH,
        }
    }

    pub fn device(&self) -> &D {
        match self {
            Grab::Keyboard(device) | Grab::Pointer(device) | Grab::Touch(device) => device,
        }
    }
}

/// Routing state of one seat.
#[derive(Debug, Clone)]
pub struct SeatContext<D> {
    name: String,
    grabs: Vec<Grab<D>>,
    /// Surface id pointer input is pinned to when no real pointer focus exists.
    pub(crate) forced_pointer_focus: Option<u32>,
}

impl<D> SeatContext<D> {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            grabs: Vec::with_capacity(DeviceClass::CLASSES.len()),
            forced_pointer_focus: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn grab(&self, class: DeviceClass) -> Option<&Grab<D>> {
        self.grabs.iter().find(|grab| grab.class() == class)
    }

    pub fn grabs(&self) -> &[Grab<D>] {
        &self.grabs
    }

    pub fn forced_pointer_focus(&self) -> Option<u32> {
        self.forced_pointer_focus
    }
}

impl<B: Backend> InputRouting<B> {
    pub fn on_seat_created(&mut self, name: &str) {
        match self.try_add_seat(name) {
            Ok(_) => {}
            Err(err @ RoutingError::OutOfMemory { .. }) => {
                tracing::error!(?err, "Failed to register seat");
            }
            Err(err) => tracing::warn!(%err, "Ignoring seat creation"),
        }
    }

    pub fn on_seat_destroyed(&mut self, name: &str) {
        if let Err(err) = self.try_remove_seat(name) {
            tracing::warn!(%err, "Ignoring seat removal");
        }
    }

    /// Reinstalls grabs for devices that changed and broadcasts the seat's capabilities.
    pub fn handle_seat_updated_caps(&mut self, name: &str) {
        let index = match self.seat_index(name) {
            Ok(index) => index,
            Err(err) => {
                tracing::warn!(%err, "Ignoring capability change");
                return;
            }
        };
        let capabilities = self.update_grabs(index);
        tracing::info!(seat = name, ?capabilities, "Seat capabilities changed");
        self.broadcast(ControlEvent::SeatCapabilities {
            name: name.to_owned(),
            capabilities,
        });
    }

    pub(crate) fn try_add_seat(&mut self, name: &str) -> Result<(), RoutingError> {
        if self.seat(name).is_some() {
            return Err(RoutingError::DuplicateSeat(name.to_owned()));
        }
        self.seats
            .try_reserve(1)
            .map_err(|source| RoutingError::OutOfMemory {
                registry: "seat",
                source,
            })?;

        self.seats.push(SeatContext::new(name));
        let capabilities = self.update_grabs(self.seats.len() - 1);
        tracing::info!(seat = name, ?capabilities, "Seat added");
        self.broadcast(ControlEvent::SeatCreated {
            name: name.to_owned(),
            capabilities,
        });
        Ok(())
    }

    pub(crate) fn try_remove_seat(&mut self, name: &str) -> Result<(), RoutingError> {
        let index = self.seat_index(name)?;
        let seat = self.seats.remove(index);
        for grab in seat.grabs.iter() {
            self.backend.unset_grab(name, grab);
        }
        tracing::info!(seat = name, "Seat removed");
        self.broadcast(ControlEvent::SeatDestroyed {
            name: name.to_owned(),
        });
        Ok(())
    }

    /// Syncs the seat's grabs with the devices the compositor exposes now.
    fn update_grabs(&mut self, index: usize) -> DeviceClass {
        let seat = &mut self.seats[index];
        let mut capabilities = DeviceClass::empty();

        for class in DeviceClass::CLASSES {
            let device = self.backend.device(&seat.name, class);
            capabilities.set(class, device.is_some());

            let held = seat.grabs.iter().position(|grab| grab.class() == class);
            if held.map(|i| seat.grabs[i].device()) == device.as_ref() {
                continue;
            }
            if let Some(i) = held {
                tracing::debug!(seat = %seat.name, ?class, "Device gone, dropping grab");
                let gone = seat.grabs.remove(i);
                self.backend.unset_grab(&seat.name, &gone);
            }
            if let Some(grab) = device.and_then(|device| Grab::for_class(class, device)) {
                tracing::debug!(seat = %seat.name, ?class, "Installing grab");
                self.backend.set_grab(&seat.name, &grab);
                seat.grabs.push(grab);
            }
        }

        capabilities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grab_class_round_trips() {
        for class in DeviceClass::CLASSES {
            let grab = Grab::for_class(class, 3u32).unwrap();
            assert_eq!(grab.class(), class);
            assert_eq!(*grab.device(), 3);
        }
    }

    #[test]
    fn grab_needs_a_single_class() {
        assert!(Grab::for_class(DeviceClass::KEYBOARD | DeviceClass::POINTER, ()).is_none());
        assert!(Grab::for_class(DeviceClass::empty(), ()).is_none());
    }
}
