use smithay::{
    backend::input::{Axis, ButtonState, KeyState},
    utils::{Logical, Point, SERIAL_COUNTER},
};

use crate::{
    backend::{Backend, DeviceEvent},
    state::{DeviceClass, InputRouting},
    surface::SurfaceContext,
};

/// A raw event, as handed over by a seat device carrying a routing grab.
///
/// Locations are global; touch point counts are read back from the compositor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    Key {
        time: u32,
        key: u32,
        state: KeyState,
    },
    Modifiers {
        depressed: u32,
        latched: u32,
        locked: u32,
        group: u32,
    },
    KeyboardCancel,
    PointerFocus,
    PointerMotion {
        time: u32,
        location: Point<f64, Logical>,
    },
    PointerButton {
        time: u32,
        button: u32,
        state: ButtonState,
    },
    PointerAxis {
        time: u32,
        axis: Axis,
        value: f64,
    },
    PointerFrame,
    PointerCancel,
    TouchDown {
        time: u32,
        id: i32,
        location: Point<f64, Logical>,
    },
    TouchUp {
        time: u32,
        id: i32,
    },
    TouchMotion {
        time: u32,
        id: i32,
        location: Point<f64, Logical>,
    },
    TouchFrame,
    TouchCancel,
}

impl InputEvent {
    /// Device class whose grab intercepts this event.
    pub fn class(&self) -> DeviceClass {
        match self {
            InputEvent::Key { .. } | InputEvent::Modifiers { .. } | InputEvent::KeyboardCancel => {
                DeviceClass::KEYBOARD
            }
            InputEvent::PointerFocus
            | InputEvent::PointerMotion { .. }
            | InputEvent::PointerButton { .. }
            | InputEvent::PointerAxis { .. }
            | InputEvent::PointerFrame
            | InputEvent::PointerCancel => DeviceClass::POINTER,
            InputEvent::TouchDown { .. }
            | InputEvent::TouchUp { .. }
            | InputEvent::TouchMotion { .. }
            | InputEvent::TouchFrame
            | InputEvent::TouchCancel => DeviceClass::TOUCH,
        }
    }
}

impl<B: Backend> InputRouting<B> {
    /// Entry point for every event intercepted by one of `seat`'s grabs.
    pub fn process_input_event(&mut self, seat: &str, event: InputEvent) {
        self.dispatch_lifecycle();
        let grabbed = self
            .seat(seat)
            .is_some_and(|ctx| ctx.grab(event.class()).is_some());
        if !grabbed {
            tracing::trace!(seat, ?event, "No routing grab, dropping event");
            return;
        }
        tracing::trace!(seat, ?event, "Routing event");

        match event {
            InputEvent::Key { time, key, state } => self.on_keyboard_key(seat, time, key, state),
            InputEvent::Modifiers {
                depressed,
                latched,
                locked,
                group,
            } => self.on_keyboard_modifiers(seat, depressed, latched, locked, group),
            InputEvent::PointerMotion { time, location } => self.on_pointer_motion(seat, time, location),
            InputEvent::PointerButton { time, button, state } => {
                self.on_pointer_button(seat, time, button, state)
            }
            InputEvent::PointerAxis { time, axis, value } => {
                if let Some((_, native)) = self.pointer_target(seat) {
                    self.deliver(seat, &native, DeviceEvent::PointerAxis { time, axis, value });
                }
            }
            InputEvent::PointerFrame => {
                if let Some((_, native)) = self.pointer_target(seat) {
                    self.deliver(seat, &native, DeviceEvent::PointerFrame);
                }
            }
            InputEvent::TouchDown { time, id, location } => self.on_touch_down(seat, time, id, location),
            InputEvent::TouchUp { time, id } => self.on_touch_up(seat, time, id),
            InputEvent::TouchMotion { time, id, location } => {
                if let Some((_, native)) = self.touch_target(seat) {
                    let location = self.backend.to_surface_local(&native, location);
                    self.deliver(seat, &native, DeviceEvent::TouchMotion { time, id, location });
                }
            }
            InputEvent::TouchFrame => {
                if let Some((_, native)) = self.touch_target(seat) {
                    self.deliver(seat, &native, DeviceEvent::TouchFrame);
                }
            }
            // The compositor's own focus picking never applies; focus moves on
            // presses and touch downs only.
            InputEvent::PointerFocus => {}
            // Grabs live until the seat goes away, cancellation changes nothing.
            InputEvent::KeyboardCancel | InputEvent::PointerCancel | InputEvent::TouchCancel => {}
        }
    }

    fn on_keyboard_key(&mut self, seat: &str, time: u32, key: u32, state: KeyState) {
        let event = DeviceEvent::Key {
            serial: SERIAL_COUNTER.next_serial(),
            time,
            key,
            state,
        };
        for native in self.natives_where(|surface| surface.routes(seat, DeviceClass::KEYBOARD)) {
            self.deliver(seat, &native, event);
        }
    }

    fn on_keyboard_modifiers(&mut self, seat: &str, depressed: u32, latched: u32, locked: u32, group: u32) {
        let event = DeviceEvent::Modifiers {
            serial: SERIAL_COUNTER.next_serial(),
            depressed,
            latched,
            locked,
            group,
        };
        let classes = DeviceClass::KEYBOARD | DeviceClass::POINTER;
        for native in self.natives_where(|surface| surface.focus.intersects(classes) && surface.accepts(seat)) {
            self.deliver(seat, &native, event);
        }
    }

    fn on_pointer_motion(&mut self, seat: &str, time: u32, location: Point<f64, Logical>) {
        self.backend.move_pointer(seat, location);

        let Some((_, native)) = self.pointer_target(seat) else {
            return;
        };
        let local = self.backend.to_surface_local(&native, location);
        // keep tracking drags that leave the input region
        if self.backend.input_region_contains(&native, local) || self.backend.pointer_button_count(seat) > 0 {
            self.deliver(
                seat,
                &native,
                DeviceEvent::PointerMotion {
                    time,
                    location: local,
                },
            );
        }
    }

    fn on_pointer_button(&mut self, seat: &str, time: u32, button: u32, state: ButtonState) {
        if state == ButtonState::Pressed {
            self.pick_pointer_focus(seat);
        }

        if let Some((_, native)) = self.pointer_target(seat) {
            let event = DeviceEvent::PointerButton {
                serial: SERIAL_COUNTER.next_serial(),
                time,
                button,
                state,
            };
            self.deliver(seat, &native, event);
        }
    }

    /// Moves `seat`'s pointer focus to the accepting surface under the pointer.
    ///
    /// Focus on the picked surface is re-affirmed on every press.
    fn pick_pointer_focus(&mut self, seat: &str) {
        let location = self.backend.pointer_location(seat);
        let Some((picked, local)) = self.backend.surface_under(location) else {
            return;
        };

        let mut matched = false;
        for index in 0..self.surfaces.len() {
            if !self.surfaces[index].accepts(seat) {
                continue;
            }
            if !matched && self.native(index).as_ref() == Some(&picked) {
                matched = true;
                self.update_focus(index, DeviceClass::POINTER, true);
            } else if self.surfaces[index].focus.contains(DeviceClass::POINTER) {
                self.update_focus(index, DeviceClass::POINTER, false);
            }
        }

        if let Some(ctx) = self.seats.iter_mut().find(|ctx| ctx.name() == seat) {
            ctx.forced_pointer_focus = None;
        }
        if matched {
            self.backend.set_pointer_focus(seat, Some((&picked, local)));
        } else {
            tracing::debug!(seat, surface = ?picked, "Press outside any accepting surface");
            self.backend.set_pointer_focus(seat, None);
        }
    }

    fn on_touch_down(&mut self, seat: &str, time: u32, id: i32, location: Point<f64, Logical>) {
        let Some(focus) = self.backend.touch_focus(seat) else {
            return;
        };

        if self.backend.touch_points(seat) == 1 {
            let mut matched = false;
            for index in 0..self.surfaces.len() {
                if !self.surfaces[index].accepts(seat) {
                    continue;
                }
                if !matched && self.native(index).as_ref() == Some(&focus) {
                    matched = true;
                    self.update_focus(index, DeviceClass::TOUCH, true);
                } else if self.surfaces[index].focus.contains(DeviceClass::TOUCH) {
                    self.update_focus(index, DeviceClass::TOUCH, false);
                }
            }
        }

        let Some((_, native)) = self.touch_target(seat) else {
            return;
        };
        let location = self.backend.to_surface_local(&native, location);
        let event = DeviceEvent::TouchDown {
            serial: SERIAL_COUNTER.next_serial(),
            time,
            id,
            location,
        };
        self.deliver(seat, &native, event);
    }

    fn on_touch_up(&mut self, seat: &str, time: u32, id: i32) {
        let Some((index, native)) = self.touch_target(seat) else {
            return;
        };
        let event = DeviceEvent::TouchUp {
            serial: SERIAL_COUNTER.next_serial(),
            time,
            id,
        };
        self.deliver(seat, &native, event);

        if self.backend.touch_points(seat) == 0 {
            self.update_focus(index, DeviceClass::TOUCH, false);
        }
    }

    /// Surface receiving `seat`'s pointer events, with its native surface.
    ///
    /// That is the pointer-focused, accepting surface the compositor's pointer
    /// focus sits on, or the forced target while there is no pointer focus.
    pub(crate) fn pointer_target(&self, seat: &str) -> Option<(usize, B::Surface)> {
        match self.backend.pointer_focus(seat) {
            Some(focus) => self
                .surfaces
                .iter()
                .enumerate()
                .filter(|(_, surface)| surface.routes(seat, DeviceClass::POINTER))
                .find_map(|(index, surface)| {
                    let native = self.backend.compositor_surface(surface.layout())?;
                    (native == focus).then_some((index, native))
                }),
            None => {
                let id = self.seat(seat)?.forced_pointer_focus?;
                let index = self.surface_index(id).ok()?;
                if !self.surfaces[index].routes(seat, DeviceClass::POINTER) {
                    return None;
                }
                Some((index, self.native(index)?))
            }
        }
    }

    fn touch_target(&self, seat: &str) -> Option<(usize, B::Surface)> {
        self.surfaces
            .iter()
            .enumerate()
            .filter(|(_, surface)| surface.routes(seat, DeviceClass::TOUCH))
            .find_map(|(index, surface)| Some((index, self.backend.compositor_surface(surface.layout())?)))
    }

    fn natives_where<F>(&self, predicate: F) -> Vec<B::Surface>
    where
        F: Fn(&SurfaceContext<B::LayoutSurface>) -> bool,
    {
        self.surfaces
            .iter()
            .filter(|surface| predicate(surface))
            .filter_map(|surface| self.backend.compositor_surface(surface.layout()))
            .collect()
    }

    /// Sends `event` once to every resource of the surface's client.
    pub(crate) fn deliver(&mut self, seat: &str, native: &B::Surface, event: DeviceEvent) {
        let resources = self.backend.resources(seat, event.class(), native);
        if resources.is_empty() {
            tracing::trace!(seat, surface = ?native, "No bound resources");
        }
        for resource in resources.iter() {
            self.backend.send(native, resource, &event);
        }
    }
}
