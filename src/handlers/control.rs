use crate::{
    backend::Backend,
    signal::ListenerToken,
    state::{DeviceClass, InputRouting, RoutingError},
};

/// Notification broadcast to every bound management client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    SeatCreated {
        name: String,
        capabilities: DeviceClass,
    },
    SeatCapabilities {
        name: String,
        capabilities: DeviceClass,
    },
    SeatDestroyed {
        name: String,
    },
    InputFocus {
        surface: u32,
        device: DeviceClass,
        enabled: bool,
    },
    InputAcceptance {
        surface: u32,
        seat: String,
        accepted: bool,
    },
}

impl<B: Backend> InputRouting<B> {
    /// Registers a management client and replays the current state to it:
    /// every seat, then the focus of every surface, then every acceptance entry.
    pub fn bind_client<F>(&mut self, listener: F) -> ListenerToken
    where
        F: FnMut(&ControlEvent) + 'static,
    {
        self.dispatch_lifecycle();
        let token = self.clients.subscribe(listener);
        for event in self.replay() {
            self.clients.emit_to(token, &event);
        }
        tracing::debug!(?token, "Management client bound");
        token
    }

    pub fn unbind_client(&mut self, token: ListenerToken) {
        if self.clients.unsubscribe(token) {
            tracing::debug!(?token, "Management client unbound");
        } else {
            tracing::warn!(?token, "Unbinding unknown management client");
        }
    }

    fn replay(&self) -> Vec<ControlEvent> {
        let seats = self.seats.iter().map(|seat| ControlEvent::SeatCreated {
            name: seat.name().to_owned(),
            capabilities: self.capabilities(seat.name()),
        });
        let focus = self.surfaces.iter().map(|surface| ControlEvent::InputFocus {
            surface: surface.id(),
            device: surface.focus(),
            enabled: true,
        });
        let acceptance = self.surfaces.iter().flat_map(|surface| {
            surface.accepted().iter().map(|seat| ControlEvent::InputAcceptance {
                surface: surface.id(),
                seat: seat.to_owned(),
                accepted: true,
            })
        });
        seats.chain(focus).chain(acceptance).collect()
    }

    pub fn set_input_focus(&mut self, surface: u32, device: DeviceClass, enabled: bool) {
        self.dispatch_lifecycle();
        if let Err(err) = self.try_set_input_focus(surface, device, enabled) {
            tracing::warn!(%err, "Ignoring set_input_focus");
        }
    }

    pub fn set_input_acceptance(&mut self, surface: u32, seat: &str, accepted: bool) {
        self.dispatch_lifecycle();
        if let Err(err) = self.try_set_input_acceptance(surface, seat, accepted) {
            tracing::warn!(%err, "Ignoring set_input_acceptance");
        }
    }

    pub(crate) fn try_set_input_focus(
        &mut self,
        surface: u32,
        device: DeviceClass,
        enabled: bool,
    ) -> Result<(), RoutingError> {
        if device.is_empty() {
            tracing::debug!(surface, "set_input_focus without devices");
            return Ok(());
        }
        let index = self.surface_index(surface)?;

        // pointer and touch have one owner per seat
        let exclusive = device - DeviceClass::KEYBOARD;
        if enabled && !exclusive.is_empty() {
            for other in 0..self.surfaces.len() {
                if other == index {
                    continue;
                }
                let lost = self.surfaces[other].focus & exclusive;
                if lost.is_empty() || !self.surfaces[other].accepted.shares_seat_with(&self.surfaces[index].accepted) {
                    continue;
                }
                self.push_native_focus(other, lost, false, None);
                self.update_focus(other, lost, false);
            }
        }

        self.update_focus(index, device, enabled);
        self.push_native_focus(index, device, enabled, None);
        Ok(())
    }

    pub(crate) fn try_set_input_acceptance(
        &mut self,
        surface: u32,
        seat: &str,
        accepted: bool,
    ) -> Result<(), RoutingError> {
        self.seat_index(seat)?;
        let index = self.surface_index(surface)?;
        let focus = self.surfaces[index].focus;

        if accepted {
            if !self.surfaces[index].accepted.insert(seat) {
                return Err(RoutingError::AlreadyAccepted {
                    surface,
                    seat: seat.to_owned(),
                });
            }
            self.push_native_focus(index, focus, true, Some(seat));
        } else {
            if !self.surfaces[index].accepts(seat) {
                return Err(RoutingError::NotAccepted {
                    surface,
                    seat: seat.to_owned(),
                });
            }
            self.push_native_focus(index, focus, false, Some(seat));
            self.surfaces[index].accepted.remove(seat);
        }

        tracing::debug!(surface, seat, accepted, "input acceptance");
        self.broadcast(ControlEvent::InputAcceptance {
            surface,
            seat: seat.to_owned(),
            accepted,
        });

        if !accepted {
            // focus only the removed seat could deliver is gone with it
            let remaining = self.surfaces[index]
                .accepted()
                .iter()
                .filter(|name| self.seat(name).is_some())
                .fold(DeviceClass::empty(), |caps, name| caps | self.capabilities(name));
            let orphaned = focus & self.capabilities(seat) & !remaining;
            if !orphaned.is_empty() {
                self.update_focus(index, orphaned, false);
            }
        }
        Ok(())
    }

    /// Mirrors a focus change into the compositor's own keyboard and pointer
    /// focus, for every accepted seat (or just `only`) having those devices.
    fn push_native_focus(&mut self, index: usize, device: DeviceClass, enabled: bool, only: Option<&str>) {
        let Some(native) = self.native(index) else {
            tracing::trace!(surface = self.surfaces[index].id(), "No compositor surface yet");
            return;
        };
        let id = self.surfaces[index].id();
        let seats: Vec<String> = self.surfaces[index]
            .accepted()
            .iter()
            .filter(|name| only.map_or(true, |only| only == *name))
            .filter(|name| self.seat(name).is_some())
            .map(str::to_owned)
            .collect();

        for seat in seats {
            let classes = device & self.capabilities(&seat);
            if classes.contains(DeviceClass::KEYBOARD) {
                if enabled {
                    self.backend.keyboard_enter(&seat, &native);
                } else {
                    self.backend.keyboard_leave(&seat, &native);
                }
            }
            if classes.contains(DeviceClass::POINTER) {
                self.push_native_pointer_focus(&seat, id, &native, enabled);
            }
        }
    }

    fn push_native_pointer_focus(&mut self, seat: &str, id: u32, native: &B::Surface, enabled: bool) {
        let Some(ctx) = self.seats.iter_mut().find(|ctx| ctx.name() == seat) else {
            return;
        };
        if enabled {
            ctx.forced_pointer_focus = Some(id);
            let local = self
                .backend
                .to_surface_local(native, self.backend.pointer_location(seat));
            self.backend.set_pointer_focus(seat, Some((native, local)));
        } else {
            if ctx.forced_pointer_focus == Some(id) {
                ctx.forced_pointer_focus = None;
            }
            if self.backend.pointer_focus(seat).as_ref() == Some(native) {
                self.backend.set_pointer_focus(seat, None);
            }
        }
    }
}
