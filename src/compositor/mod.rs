//! Routing on top of smithay seats.
//!
//! [`SeatBackend`] mirrors the seat state the router reads (pointer location,
//! pressed buttons, touch points, focus) and queues everything that needs the
//! compositor state to carry out. The routing grabs in [`grabs`] keep the
//! mirror current and deliver queued events through smithay's grab handles;
//! [`grabs::flush_native`] applies the rest (grab installation, keyboard focus,
//! keyboard delivery) once the compositor state is at hand.

use smithay::{
    input::{Seat, SeatHandler},
    reexports::wayland_server::{backend::ClientId, protocol::wl_surface::WlSurface, Resource},
    utils::{Logical, Point, Rectangle},
};

use crate::{
    backend::{Backend, BoundResources, DeviceEvent, Lifecycle},
    handlers::seat::Grab,
    signal::Signal,
    state::DeviceClass,
};

pub mod grabs;

/// An application surface as placed by the layout collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct IviSurface {
    pub id: u32,
    pub surface: WlSurface,
    pub geometry: Rectangle<i32, Logical>,
}

impl IviSurface {
    fn origin(&self) -> Point<f64, Logical> {
        self.geometry.loc.to_f64()
    }

    fn contains_local(&self, local: Point<f64, Logical>) -> bool {
        let size = self.geometry.size.to_f64();
        local.x >= 0.0 && local.y >= 0.0 && local.x < size.w && local.y < size.h
    }
}

/// Identity of one device object of a seat. A device unplugged and plugged
/// again gets a new identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(u32);

/// The client resources of a surface for one seat.
///
/// smithay keeps a single list of device resources per client, so the whole
/// client stands for them.
#[derive(Debug, Clone, PartialEq)]
pub struct SeatResource {
    pub seat: String,
    pub client: ClientId,
}

#[derive(Debug)]
pub(crate) enum NativeRequest {
    Grab {
        seat: String,
        class: DeviceClass,
        install: bool,
    },
    KeyboardFocus {
        seat: String,
        surface: WlSurface,
        enter: bool,
    },
    Deliver {
        seat: String,
        surface: WlSurface,
        event: DeviceEvent,
    },
}

impl NativeRequest {
    fn delivery_for(&self, seat_name: &str, classes: DeviceClass) -> bool {
        match self {
            NativeRequest::Deliver { seat, event, .. } => seat == seat_name && classes.contains(event.class()),
            _ => false,
        }
    }
}

struct SeatEntry<D: SeatHandler> {
    seat: Seat<D>,
    name: String,
    devices: [Option<DeviceId>; 3],
    pointer_location: Point<f64, Logical>,
    pointer_focus: Option<WlSurface>,
    buttons: u32,
    touch_focus: Option<WlSurface>,
    touch_points: u32,
}

fn slot(class: DeviceClass) -> Option<usize> {
    DeviceClass::CLASSES.iter().position(|known| *known == class)
}

/// [`Backend`] over smithay seats and the surfaces the IVI layout places.
pub struct SeatBackend<D: SeatHandler + 'static> {
    seats: Vec<SeatEntry<D>>,
    /// Stacking order, bottom first.
    surfaces: Vec<IviSurface>,
    lifecycle: Signal<Lifecycle<IviSurface>>,
    pub(crate) requests: Vec<NativeRequest>,
    next_device: u32,
}

impl<D: SeatHandler + 'static> Default for SeatBackend<D> {
    fn default() -> Self {
        Self {
            seats: Vec::new(),
            surfaces: Vec::new(),
            lifecycle: Signal::new(),
            requests: Vec::new(),
            next_device: 0,
        }
    }
}

impl<D: SeatHandler + 'static> SeatBackend<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopts a seat and announces it.
    pub fn add_seat(&mut self, seat: Seat<D>) {
        let name = seat.name().to_owned();
        if self.entry(&name).is_some() {
            tracing::warn!(seat = %name, "Seat added twice");
            return;
        }
        let location = seat
            .get_pointer()
            .map(|pointer| pointer.current_location())
            .unwrap_or_default();
        self.seats.push(SeatEntry {
            seat,
            name: name.clone(),
            devices: [None; 3],
            pointer_location: location,
            pointer_focus: None,
            buttons: 0,
            touch_focus: None,
            touch_points: 0,
        });
        self.refresh_devices(&name);
        self.lifecycle.emit(&Lifecycle::SeatCreated(name));
    }

    /// Call after adding or removing a keyboard, pointer or touch device.
    pub fn update_seat(&mut self, name: &str) {
        if self.entry(name).is_none() {
            tracing::warn!(seat = name, "Capability change on unknown seat");
            return;
        }
        self.refresh_devices(name);
        self.lifecycle
            .emit(&Lifecycle::SeatCapabilitiesChanged(name.to_owned()));
    }

    pub fn remove_seat(&mut self, name: &str) {
        if self.entry(name).is_none() {
            return;
        }
        self.lifecycle.emit(&Lifecycle::SeatDestroyed(name.to_owned()));
        self.seats.retain(|entry| entry.name != name);
    }

    pub fn seat(&self, name: &str) -> Option<&Seat<D>> {
        self.entry(name).map(|entry| &entry.seat)
    }

    /// Maps a surface on top of the stack, announcing it when new.
    pub fn map_surface(&mut self, surface: IviSurface) {
        let known = self.surfaces.iter().any(|mapped| mapped.id == surface.id);
        self.surfaces.retain(|mapped| mapped.id != surface.id);
        self.surfaces.push(surface.clone());
        if !known {
            self.lifecycle.emit(&Lifecycle::SurfaceCreated(surface));
        }
    }

    pub fn set_geometry(&mut self, id: u32, geometry: Rectangle<i32, Logical>) {
        if let Some(surface) = self.surfaces.iter_mut().find(|surface| surface.id == id) {
            surface.geometry = geometry;
        }
    }

    pub fn unmap_surface(&mut self, id: u32) {
        let Some(index) = self.surfaces.iter().position(|surface| surface.id == id) else {
            return;
        };
        let surface = self.surfaces.remove(index);
        self.lifecycle.emit(&Lifecycle::SurfaceDestroyed(surface));
    }

    pub(crate) fn take_requests(&mut self) -> Vec<NativeRequest> {
        std::mem::take(&mut self.requests)
    }

    /// Removes and returns the queued deliveries of `seat` for `classes`.
    pub(crate) fn take_deliveries(&mut self, seat: &str, classes: DeviceClass) -> Vec<(WlSurface, DeviceEvent)> {
        let mut taken = Vec::new();
        let mut index = 0;
        while index < self.requests.len() {
            if !self.requests[index].delivery_for(seat, classes) {
                index += 1;
                continue;
            }
            if let NativeRequest::Deliver { surface, event, .. } = self.requests.remove(index) {
                taken.push((surface, event));
            }
        }
        taken
    }

    pub(crate) fn set_buttons(&mut self, seat: &str, buttons: u32) {
        if let Some(entry) = self.entry_mut(seat) {
            entry.buttons = buttons;
        }
    }

    /// Tracks a touch point going down, picking the touch focus on the first one.
    pub(crate) fn touch_begin(&mut self, seat: &str, location: Point<f64, Logical>) {
        let under = self.surface_under(location).map(|(surface, _)| surface);
        if let Some(entry) = self.entry_mut(seat) {
            if entry.touch_points == 0 {
                entry.touch_focus = under;
            }
            entry.touch_points += 1;
        }
    }

    pub(crate) fn touch_end(&mut self, seat: &str) {
        if let Some(entry) = self.entry_mut(seat) {
            entry.touch_points = entry.touch_points.saturating_sub(1);
            if entry.touch_points == 0 {
                entry.touch_focus = None;
            }
        }
    }

    /// Global surface origin of a mapped surface.
    pub(crate) fn origin(&self, surface: &WlSurface) -> Option<Point<f64, Logical>> {
        self.mapped(surface).map(IviSurface::origin)
    }

    fn refresh_devices(&mut self, name: &str) {
        let mut next = self.next_device;
        if let Some(entry) = self.seats.iter_mut().find(|entry| entry.name == name) {
            let present = [
                entry.seat.get_keyboard().is_some(),
                entry.seat.get_pointer().is_some(),
                entry.seat.get_touch().is_some(),
            ];
            for (device, present) in entry.devices.iter_mut().zip(present) {
                match (present, device.is_some()) {
                    (true, false) => {
                        *device = Some(DeviceId(next));
                        next += 1;
                    }
                    (false, true) => *device = None,
                    _ => {}
                }
            }
        }
        self.next_device = next;
    }

    fn entry(&self, name: &str) -> Option<&SeatEntry<D>> {
        self.seats.iter().find(|entry| entry.name == name)
    }

    fn entry_mut(&mut self, name: &str) -> Option<&mut SeatEntry<D>> {
        self.seats.iter_mut().find(|entry| entry.name == name)
    }

    fn mapped(&self, surface: &WlSurface) -> Option<&IviSurface> {
        self.surfaces.iter().find(|mapped| mapped.surface == *surface)
    }
}

impl<D: SeatHandler + 'static> Backend for SeatBackend<D> {
    type LayoutSurface = IviSurface;
    type Surface = WlSurface;
    type Device = DeviceId;
    type Resource = SeatResource;

    fn lifecycle(&mut self) -> &mut Signal<Lifecycle<IviSurface>> {
        &mut self.lifecycle
    }

    fn seat_names(&self) -> Vec<String> {
        self.seats.iter().map(|entry| entry.name.clone()).collect()
    }

    fn layout_surfaces(&self) -> Vec<IviSurface> {
        self.surfaces.clone()
    }

    fn surface_id(&self, surface: &IviSurface) -> u32 {
        surface.id
    }

    fn compositor_surface(&self, surface: &IviSurface) -> Option<WlSurface> {
        let mapped = self.surfaces.iter().any(|mapped| mapped.id == surface.id);
        (mapped && surface.surface.is_alive()).then(|| surface.surface.clone())
    }

    fn device(&self, seat: &str, class: DeviceClass) -> Option<DeviceId> {
        self.entry(seat)?.devices[slot(class)?]
    }

    fn set_grab(&mut self, seat: &str, grab: &Grab<DeviceId>) {
        self.requests.push(NativeRequest::Grab {
            seat: seat.to_owned(),
            class: grab.class(),
            install: true,
        });
    }

    fn unset_grab(&mut self, seat: &str, grab: &Grab<DeviceId>) {
        self.requests.push(NativeRequest::Grab {
            seat: seat.to_owned(),
            class: grab.class(),
            install: false,
        });
    }

    fn pointer_location(&self, seat: &str) -> Point<f64, Logical> {
        self.entry(seat)
            .map(|entry| entry.pointer_location)
            .unwrap_or_default()
    }

    fn move_pointer(&mut self, seat: &str, location: Point<f64, Logical>) {
        if let Some(entry) = self.entry_mut(seat) {
            entry.pointer_location = location;
        }
    }

    fn pointer_focus(&self, seat: &str) -> Option<WlSurface> {
        self.entry(seat)?.pointer_focus.clone()
    }

    // Applied to smithay by the pointer grab on the next pointer event.
    fn set_pointer_focus(&mut self, seat: &str, focus: Option<(&WlSurface, Point<f64, Logical>)>) {
        if let Some(entry) = self.entry_mut(seat) {
            entry.pointer_focus = focus.map(|(surface, _)| surface.clone());
        }
    }

    fn pointer_button_count(&self, seat: &str) -> u32 {
        self.entry(seat).map_or(0, |entry| entry.buttons)
    }

    fn surface_under(&self, location: Point<f64, Logical>) -> Option<(WlSurface, Point<f64, Logical>)> {
        self.surfaces
            .iter()
            .rev()
            .filter(|mapped| mapped.surface.is_alive())
            .find(|mapped| mapped.contains_local(location - mapped.origin()))
            .map(|mapped| (mapped.surface.clone(), location - mapped.origin()))
    }

    fn keyboard_enter(&mut self, seat: &str, surface: &WlSurface) {
        self.requests.push(NativeRequest::KeyboardFocus {
            seat: seat.to_owned(),
            surface: surface.clone(),
            enter: true,
        });
    }

    fn keyboard_leave(&mut self, seat: &str, surface: &WlSurface) {
        self.requests.push(NativeRequest::KeyboardFocus {
            seat: seat.to_owned(),
            surface: surface.clone(),
            enter: false,
        });
    }

    fn touch_focus(&self, seat: &str) -> Option<WlSurface> {
        self.entry(seat)?.touch_focus.clone()
    }

    fn touch_points(&self, seat: &str) -> u32 {
        self.entry(seat).map_or(0, |entry| entry.touch_points)
    }

    fn to_surface_local(&self, surface: &WlSurface, location: Point<f64, Logical>) -> Point<f64, Logical> {
        match self.mapped(surface) {
            Some(mapped) => location - mapped.origin(),
            None => location,
        }
    }

    fn input_region_contains(&self, surface: &WlSurface, local: Point<f64, Logical>) -> bool {
        self.mapped(surface)
            .is_some_and(|mapped| mapped.contains_local(local))
    }

    fn resources(&self, seat: &str, _class: DeviceClass, surface: &WlSurface) -> BoundResources<SeatResource> {
        let mut resources = BoundResources::default();
        if let Some(client) = surface.client() {
            resources.focused.push(SeatResource {
                seat: seat.to_owned(),
                client: client.id(),
            });
        }
        resources
    }

    fn send(&mut self, surface: &WlSurface, resource: &SeatResource, event: &DeviceEvent) {
        self.requests.push(NativeRequest::Deliver {
            seat: resource.seat.clone(),
            surface: surface.clone(),
            event: *event,
        });
    }
}

#[cfg(test)]
mod tests {
    use smithay::{
        backend::input::{ButtonState, TouchSlot},
        input::{
            pointer::{ButtonEvent, MotionEvent},
            touch::{DownEvent, UpEvent},
            SeatState,
        },
        reexports::wayland_server::Display,
        utils::SERIAL_COUNTER,
    };

    use super::*;
    use crate::{
        compositor::grabs::flush_native, config::Config, protocols::ivi_input::IviInputHandler, state::InputRouting,
    };

    struct TestState {
        seat_state: SeatState<TestState>,
        routing: InputRouting<SeatBackend<TestState>>,
    }

    impl SeatHandler for TestState {
        type KeyboardFocus = WlSurface;
        type PointerFocus = WlSurface;
        type TouchFocus = WlSurface;

        fn seat_state(&mut self) -> &mut SeatState<Self> {
            &mut self.seat_state
        }
    }

    smithay::delegate_seat!(TestState);

    impl IviInputHandler for TestState {
        type Backend = SeatBackend<TestState>;

        fn input_routing(&mut self) -> &mut InputRouting<Self::Backend> {
            &mut self.routing
        }

        fn routing_changed(&mut self) {
            flush_native(self);
        }
    }

    fn setup() -> (Display<TestState>, TestState, Seat<TestState>) {
        let display = Display::new().unwrap();
        let mut seat_state = SeatState::new();
        let seat = seat_state.new_wl_seat(&display.handle(), "default");
        let state = TestState {
            seat_state,
            routing: InputRouting::new(Config::default(), SeatBackend::new()),
        };
        (display, state, seat)
    }

    #[test]
    fn seat_changes_reach_the_router() {
        let (_display, mut state, mut seat) = setup();
        seat.add_pointer();
        state.routing.backend_mut().add_seat(seat.clone());
        state.routing.wire();
        assert_eq!(state.routing.capabilities("default"), DeviceClass::POINTER);
        assert!(state.routing.seat("default").unwrap().grab(DeviceClass::POINTER).is_some());

        seat.add_touch();
        state.routing.backend_mut().update_seat("default");
        state.routing.dispatch_lifecycle();
        assert_eq!(
            state.routing.capabilities("default"),
            DeviceClass::POINTER | DeviceClass::TOUCH
        );

        state.routing.backend_mut().remove_seat("default");
        state.routing.dispatch_lifecycle();
        assert!(state.routing.seat("default").is_none());
    }

    #[test]
    fn replugged_device_gets_a_new_identity() {
        let (_display, mut state, mut seat) = setup();
        seat.add_pointer();
        state.routing.backend_mut().add_seat(seat.clone());
        let first = state.routing.backend().device("default", DeviceClass::POINTER);
        assert!(first.is_some());

        seat.remove_pointer();
        state.routing.backend_mut().update_seat("default");
        assert!(state.routing.backend().device("default", DeviceClass::POINTER).is_none());

        seat.add_pointer();
        state.routing.backend_mut().update_seat("default");
        let second = state.routing.backend().device("default", DeviceClass::POINTER);
        assert!(second.is_some());
        assert_ne!(first, second);
    }

    #[test]
    fn grab_requests_wait_for_flush() {
        let (_display, mut state, mut seat) = setup();
        let pointer = seat.add_pointer();
        state.routing.backend_mut().add_seat(seat.clone());
        state.routing.wire();
        assert!(!pointer.is_grabbed());

        state.routing_changed();

        assert!(pointer.is_grabbed());
        assert!(state.routing.backend_mut().take_requests().is_empty());
    }

    #[test]
    fn pointer_input_passes_through_the_router() {
        let (_display, mut state, mut seat) = setup();
        let pointer = seat.add_pointer();
        state.routing.backend_mut().add_seat(seat.clone());
        state.routing.wire();
        flush_native(&mut state);

        let motion = MotionEvent {
            location: (40.0, 30.0).into(),
            serial: SERIAL_COUNTER.next_serial(),
            time: 1,
        };
        pointer.motion(&mut state, None, &motion);
        assert_eq!(
            state.routing.backend().pointer_location("default"),
            Point::from((40.0, 30.0))
        );

        let press = ButtonEvent {
            serial: SERIAL_COUNTER.next_serial(),
            time: 2,
            button: 0x110,
            state: ButtonState::Pressed,
        };
        pointer.button(&mut state, &press);
        assert_eq!(state.routing.backend().pointer_button_count("default"), 1);
    }

    #[test]
    fn touch_points_are_counted_through_the_grab() {
        let (_display, mut state, mut seat) = setup();
        let touch = seat.add_touch();
        state.routing.backend_mut().add_seat(seat.clone());
        state.routing.wire();
        flush_native(&mut state);

        let slot = TouchSlot::from(Some(0));
        let down = DownEvent {
            slot,
            location: (5.0, 5.0).into(),
            serial: SERIAL_COUNTER.next_serial(),
            time: 1,
        };
        touch.down(&mut state, None, &down);
        assert_eq!(state.routing.backend().touch_points("default"), 1);
        assert!(state.routing.backend().touch_focus("default").is_none());

        let up = UpEvent {
            slot,
            serial: SERIAL_COUNTER.next_serial(),
            time: 2,
        };
        touch.up(&mut state, &up);
        assert_eq!(state.routing.backend().touch_points("default"), 0);
    }
}
