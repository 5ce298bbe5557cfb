//! Keyboard, pointer and touch grabs feeding smithay seat input into the router.
//!
//! Each grab turns the raw device event into an [`InputEvent`], hands it to
//! [`InputRouting::process_input_event`] and then delivers whatever the router
//! queued for its device class through the grab's inner handle.

use std::fmt;

use smithay::{
    backend::input::{Axis, KeyState, TouchSlot},
    input::{
        keyboard::{self, KeyboardGrab, KeyboardHandle, KeyboardInnerHandle, Keycode, ModifiersState},
        pointer::{
            self, AxisFrame, ButtonEvent, Focus, GestureHoldBeginEvent, GestureHoldEndEvent,
            GesturePinchBeginEvent, GesturePinchEndEvent, GesturePinchUpdateEvent, GestureSwipeBeginEvent,
            GestureSwipeEndEvent, GestureSwipeUpdateEvent, MotionEvent, PointerGrab, PointerInnerHandle,
            RelativeMotionEvent,
        },
        touch::{self, DownEvent, OrientationEvent, ShapeEvent, TouchGrab, TouchInnerHandle, UpEvent},
        SeatHandler,
    },
    reexports::wayland_server::{
        protocol::{wl_keyboard, wl_surface::WlSurface},
        Resource,
    },
    utils::{Logical, Point, Serial, SERIAL_COUNTER},
};

use crate::{
    backend::{Backend, DeviceEvent},
    compositor::{NativeRequest, SeatBackend},
    handlers::input::InputEvent,
    protocols::ivi_input::IviInputHandler,
    state::DeviceClass,
};

/// Compositor state the routing grabs run against.
pub trait RoutingState:
    SeatHandler<KeyboardFocus = WlSurface, PointerFocus = WlSurface, TouchFocus = WlSurface>
    + IviInputHandler<Backend = SeatBackend<Self>>
    + 'static
{
}

impl<D> RoutingState for D where
    D: SeatHandler<KeyboardFocus = WlSurface, PointerFocus = WlSurface, TouchFocus = WlSurface>
        + IviInputHandler<Backend = SeatBackend<D>>
        + 'static
{
}

/// Applies what the router queued outside of any grab: lifecycle changes,
/// grab (un)installation, keyboard focus and keyboard delivery.
///
/// Call it after wiring, after feeding seat or surface changes into the
/// [`SeatBackend`] and from [`IviInputHandler::routing_changed`].
pub fn flush_native<D: RoutingState>(data: &mut D) {
    data.input_routing().dispatch_lifecycle();
    loop {
        let requests = data.input_routing().backend_mut().take_requests();
        if requests.is_empty() {
            break;
        }
        for request in requests {
            match request {
                NativeRequest::Grab { seat, class, install } => set_native_grab(data, &seat, class, install),
                NativeRequest::KeyboardFocus { seat, surface, enter } => {
                    set_keyboard_focus(data, &seat, &surface, enter)
                }
                NativeRequest::Deliver { seat, surface, event } if event.class() == DeviceClass::KEYBOARD => {
                    if let Some(keyboard) = keyboard_of(data, &seat) {
                        send_keyboard(&keyboard, &surface, &event);
                    }
                }
                NativeRequest::Deliver { seat, event, .. } => {
                    tracing::trace!(seat, ?event, "Dropping delivery queued outside a grab");
                }
            }
        }
    }
}

fn keyboard_of<D: RoutingState>(data: &mut D, seat: &str) -> Option<KeyboardHandle<D>> {
    data.input_routing().backend().seat(seat)?.get_keyboard()
}

fn set_native_grab<D: RoutingState>(data: &mut D, name: &str, class: DeviceClass, install: bool) {
    let Some(seat) = data.input_routing().backend().seat(name).cloned() else {
        tracing::trace!(seat = name, "Seat gone before its grab was applied");
        return;
    };
    let serial = SERIAL_COUNTER.next_serial();

    if class == DeviceClass::KEYBOARD {
        let Some(keyboard) = seat.get_keyboard() else {
            return;
        };
        if install {
            let start_data = keyboard::GrabStartData {
                focus: keyboard.current_focus(),
            };
            keyboard.set_grab(data, RoutingKeyboardGrab::new(name, start_data), serial);
        } else {
            keyboard.unset_grab(data);
        }
    } else if class == DeviceClass::POINTER {
        let Some(pointer) = seat.get_pointer() else {
            return;
        };
        if install {
            let start_data = pointer::GrabStartData {
                focus: None,
                button: 0,
                location: pointer.current_location(),
            };
            pointer.set_grab(data, RoutingPointerGrab::new(name, start_data), serial, Focus::Keep);
        } else {
            pointer.unset_grab(data, serial, 0);
        }
    } else if class == DeviceClass::TOUCH {
        let Some(touch) = seat.get_touch() else {
            return;
        };
        if install {
            let start_data = touch::GrabStartData {
                focus: None,
                slot: TouchSlot::from(None::<u32>),
                location: Point::default(),
            };
            touch.set_grab(data, RoutingTouchGrab::new(name, start_data), serial);
        } else {
            touch.unset_grab(data);
        }
    }
    tracing::debug!(seat = name, ?class, install, "Native grab applied");
}

fn set_keyboard_focus<D: RoutingState>(data: &mut D, seat: &str, surface: &WlSurface, enter: bool) {
    let Some(keyboard) = keyboard_of(data, seat) else {
        return;
    };
    let serial = SERIAL_COUNTER.next_serial();
    if enter {
        keyboard.set_focus(data, Some(surface.clone()), serial);
    } else if keyboard.current_focus().as_ref() == Some(surface) {
        keyboard.set_focus(data, None, serial);
    }
}

fn send_keyboard<D: SeatHandler + 'static>(keyboard: &KeyboardHandle<D>, surface: &WlSurface, event: &DeviceEvent) {
    let Some(client) = surface.client() else {
        return;
    };
    for wl_keyboard in keyboard.client_keyboards(&client) {
        match *event {
            DeviceEvent::Key {
                serial,
                time,
                key,
                state,
            } => {
                let state = match state {
                    KeyState::Pressed => wl_keyboard::KeyState::Pressed,
                    KeyState::Released => wl_keyboard::KeyState::Released,
                };
                wl_keyboard.key(serial.into(), time, key, state);
            }
            DeviceEvent::Modifiers {
                serial,
                depressed,
                latched,
                locked,
                group,
            } => wl_keyboard.modifiers(serial.into(), depressed, latched, locked, group),
            _ => {}
        }
    }
}

fn origin_of<D: RoutingState>(data: &mut D, surface: &WlSurface) -> Point<f64, Logical> {
    data.input_routing()
        .backend()
        .origin(surface)
        .unwrap_or_default()
}

pub struct RoutingKeyboardGrab<D: SeatHandler + 'static> {
    seat: String,
    start_data: keyboard::GrabStartData<D>,
}

impl<D: SeatHandler + 'static> RoutingKeyboardGrab<D> {
    pub fn new(seat: &str, start_data: keyboard::GrabStartData<D>) -> Self {
        Self {
            seat: seat.to_owned(),
            start_data,
        }
    }
}

impl<D: SeatHandler + 'static> fmt::Debug for RoutingKeyboardGrab<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingKeyboardGrab").field("seat", &self.seat).finish()
    }
}

impl<D: RoutingState> KeyboardGrab<D> for RoutingKeyboardGrab<D> {
    fn input(
        &mut self,
        data: &mut D,
        _handle: &mut KeyboardInnerHandle<'_, D>,
        keycode: Keycode,
        state: KeyState,
        modifiers: Option<ModifiersState>,
        _serial: Serial,
        time: u32,
    ) {
        let routing = data.input_routing();
        // evdev codes on the wire
        let key = keycode.raw().saturating_sub(8);
        routing.process_input_event(&self.seat, InputEvent::Key { time, key, state });
        if let Some(modifiers) = modifiers {
            let mods = modifiers.serialized;
            routing.process_input_event(
                &self.seat,
                InputEvent::Modifiers {
                    depressed: mods.depressed,
                    latched: mods.latched,
                    locked: mods.locked,
                    group: mods.layout_effective,
                },
            );
        }

        let deliveries = routing
            .backend_mut()
            .take_deliveries(&self.seat, DeviceClass::KEYBOARD);
        let Some(keyboard) = keyboard_of(data, &self.seat) else {
            return;
        };
        for (surface, event) in deliveries {
            send_keyboard(&keyboard, &surface, &event);
        }
    }

    fn set_focus(
        &mut self,
        data: &mut D,
        handle: &mut KeyboardInnerHandle<'_, D>,
        focus: Option<WlSurface>,
        serial: Serial,
    ) {
        handle.set_focus(data, focus, serial);
    }

    fn start_data(&self) -> &keyboard::GrabStartData<D> {
        &self.start_data
    }

    fn unset(&mut self, _data: &mut D) {
        tracing::trace!(seat = %self.seat, "Keyboard routing grab unset");
    }
}

pub struct RoutingPointerGrab<D: SeatHandler + 'static> {
    seat: String,
    start_data: pointer::GrabStartData<D>,
}

impl<D: SeatHandler + 'static> RoutingPointerGrab<D> {
    pub fn new(seat: &str, start_data: pointer::GrabStartData<D>) -> Self {
        Self {
            seat: seat.to_owned(),
            start_data,
        }
    }
}

impl<D: SeatHandler + 'static> fmt::Debug for RoutingPointerGrab<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingPointerGrab").field("seat", &self.seat).finish()
    }
}

impl<D: RoutingState> RoutingPointerGrab<D> {
    fn route<I>(&self, data: &mut D, handle: &mut PointerInnerHandle<'_, D>, time: u32, events: I)
    where
        I: IntoIterator<Item = InputEvent>,
    {
        let routing = data.input_routing();
        let pressed = u32::try_from(handle.current_pressed().len()).unwrap_or(u32::MAX);
        routing.backend_mut().set_buttons(&self.seat, pressed);
        for event in events {
            routing.process_input_event(&self.seat, event);
        }
        let deliveries = routing
            .backend_mut()
            .take_deliveries(&self.seat, DeviceClass::POINTER);
        let location = routing.backend().pointer_location(&self.seat);
        let focus = routing.backend().pointer_focus(&self.seat);

        if deliveries.is_empty() {
            // carry a focus the router dropped or moved over to the compositor
            if handle.current_focus() != focus {
                let focus = focus.map(|surface| {
                    let origin = origin_of(data, &surface);
                    (surface, origin)
                });
                let event = MotionEvent {
                    location,
                    serial: SERIAL_COUNTER.next_serial(),
                    time,
                };
                handle.motion(data, focus, &event);
            }
            return;
        }

        for (surface, event) in deliveries {
            let origin = origin_of(data, &surface);
            if handle.current_focus().as_ref() != Some(&surface) {
                let enter = MotionEvent {
                    location,
                    serial: SERIAL_COUNTER.next_serial(),
                    time,
                };
                handle.motion(data, Some((surface.clone(), origin)), &enter);
            }
            match event {
                DeviceEvent::PointerMotion { time, location } => {
                    let motion = MotionEvent {
                        location: origin + location,
                        serial: SERIAL_COUNTER.next_serial(),
                        time,
                    };
                    handle.motion(data, Some((surface, origin)), &motion);
                }
                DeviceEvent::PointerButton {
                    serial,
                    time,
                    button,
                    state,
                } => handle.button(
                    data,
                    &ButtonEvent {
                        serial,
                        time,
                        button,
                        state,
                    },
                ),
                DeviceEvent::PointerAxis { time, axis, value } => {
                    handle.axis(data, AxisFrame::new(time).value(axis, value))
                }
                DeviceEvent::PointerFrame => handle.frame(data),
                _ => {}
            }
        }
    }

    fn current_target(&self, data: &mut D, handle: &PointerInnerHandle<'_, D>) -> Option<(WlSurface, Point<f64, Logical>)> {
        let surface = handle.current_focus()?;
        let origin = origin_of(data, &surface);
        Some((surface, origin))
    }
}

impl<D: RoutingState> PointerGrab<D> for RoutingPointerGrab<D> {
    fn motion(
        &mut self,
        data: &mut D,
        handle: &mut PointerInnerHandle<'_, D>,
        _focus: Option<(WlSurface, Point<f64, Logical>)>,
        event: &MotionEvent,
    ) {
        let routed = InputEvent::PointerMotion {
            time: event.time,
            location: event.location,
        };
        self.route(data, handle, event.time, [routed]);
    }

    fn relative_motion(
        &mut self,
        data: &mut D,
        handle: &mut PointerInnerHandle<'_, D>,
        _focus: Option<(WlSurface, Point<f64, Logical>)>,
        event: &RelativeMotionEvent,
    ) {
        let focus = self.current_target(data, handle);
        handle.relative_motion(data, focus, event);
    }

    fn button(&mut self, data: &mut D, handle: &mut PointerInnerHandle<'_, D>, event: &ButtonEvent) {
        let routed = InputEvent::PointerButton {
            time: event.time,
            button: event.button,
            state: event.state,
        };
        self.route(data, handle, event.time, [routed]);
    }

    fn axis(&mut self, data: &mut D, handle: &mut PointerInnerHandle<'_, D>, details: AxisFrame) {
        let (horizontal, vertical) = details.axis;
        let routed = [
            (Axis::Horizontal, horizontal),
            (Axis::Vertical, vertical),
        ]
        .into_iter()
        .filter(|(_, value)| *value != 0.0)
        .map(|(axis, value)| InputEvent::PointerAxis {
            time: details.time,
            axis,
            value,
        });
        self.route(data, handle, details.time, routed);
    }

    fn frame(&mut self, data: &mut D, handle: &mut PointerInnerHandle<'_, D>) {
        self.route(data, handle, 0, [InputEvent::PointerFrame]);
    }

    fn gesture_swipe_begin(&mut self, data: &mut D, handle: &mut PointerInnerHandle<'_, D>, event: &GestureSwipeBeginEvent) {
        handle.gesture_swipe_begin(data, event);
    }

    fn gesture_swipe_update(
        &mut self,
        data: &mut D,
        handle: &mut PointerInnerHandle<'_, D>,
        event: &GestureSwipeUpdateEvent,
    ) {
        handle.gesture_swipe_update(data, event);
    }

    fn gesture_swipe_end(&mut self, data: &mut D, handle: &mut PointerInnerHandle<'_, D>, event: &GestureSwipeEndEvent) {
        handle.gesture_swipe_end(data, event);
    }

    fn gesture_pinch_begin(&mut self, data: &mut D, handle: &mut PointerInnerHandle<'_, D>, event: &GesturePinchBeginEvent) {
        handle.gesture_pinch_begin(data, event);
    }

    fn gesture_pinch_update(
        &mut self,
        data: &mut D,
        handle: &mut PointerInnerHandle<'_, D>,
        event: &GesturePinchUpdateEvent,
    ) {
        handle.gesture_pinch_update(data, event);
    }

    fn gesture_pinch_end(&mut self, data: &mut D, handle: &mut PointerInnerHandle<'_, D>, event: &GesturePinchEndEvent) {
        handle.gesture_pinch_end(data, event);
    }

    fn gesture_hold_begin(&mut self, data: &mut D, handle: &mut PointerInnerHandle<'_, D>, event: &GestureHoldBeginEvent) {
        handle.gesture_hold_begin(data, event);
    }

    fn gesture_hold_end(&mut self, data: &mut D, handle: &mut PointerInnerHandle<'_, D>, event: &GestureHoldEndEvent) {
        handle.gesture_hold_end(data, event);
    }

    fn start_data(&self) -> &pointer::GrabStartData<D> {
        &self.start_data
    }

    fn unset(&mut self, _data: &mut D) {
        tracing::trace!(seat = %self.seat, "Pointer routing grab unset");
    }
}

pub struct RoutingTouchGrab<D: SeatHandler + 'static> {
    seat: String,
    start_data: touch::GrabStartData<D>,
}

impl<D: SeatHandler + 'static> RoutingTouchGrab<D> {
    pub fn new(seat: &str, start_data: touch::GrabStartData<D>) -> Self {
        Self {
            seat: seat.to_owned(),
            start_data,
        }
    }
}

impl<D: SeatHandler + 'static> fmt::Debug for RoutingTouchGrab<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingTouchGrab").field("seat", &self.seat).finish()
    }
}

impl<D: RoutingState> RoutingTouchGrab<D> {
    fn route(&self, data: &mut D, handle: &mut TouchInnerHandle<'_, D>, event: InputEvent, seq: Serial) {
        let routing = data.input_routing();
        routing.process_input_event(&self.seat, event);
        let deliveries = routing
            .backend_mut()
            .take_deliveries(&self.seat, DeviceClass::TOUCH);

        for (surface, event) in deliveries {
            let origin = origin_of(data, &surface);
            match event {
                DeviceEvent::TouchDown {
                    serial,
                    time,
                    id,
                    location,
                } => {
                    let down = DownEvent {
                        slot: slot(id),
                        location: origin + location,
                        serial,
                        time,
                    };
                    handle.down(data, Some((surface, origin)), &down, seq);
                }
                DeviceEvent::TouchUp { serial, time, id } => {
                    handle.up(
                        data,
                        &UpEvent {
                            slot: slot(id),
                            serial,
                            time,
                        },
                        seq,
                    );
                }
                DeviceEvent::TouchMotion { time, id, location } => {
                    let motion = touch::MotionEvent {
                        slot: slot(id),
                        location: origin + location,
                        time,
                    };
                    handle.motion(data, Some((surface, origin)), &motion, seq);
                }
                DeviceEvent::TouchFrame => handle.frame(data, seq),
                _ => {}
            }
        }
    }
}

fn slot(id: i32) -> TouchSlot {
    u32::try_from(id).ok().into()
}

fn slot_id(slot: TouchSlot) -> i32 {
    i32::from(slot)
}

impl<D: RoutingState> TouchGrab<D> for RoutingTouchGrab<D> {
    fn down(
        &mut self,
        data: &mut D,
        handle: &mut TouchInnerHandle<'_, D>,
        _focus: Option<(WlSurface, Point<f64, Logical>)>,
        event: &DownEvent,
        seq: Serial,
    ) {
        data.input_routing()
            .backend_mut()
            .touch_begin(&self.seat, event.location);
        let routed = InputEvent::TouchDown {
            time: event.time,
            id: slot_id(event.slot),
            location: event.location,
        };
        self.route(data, handle, routed, seq);
    }

    fn up(&mut self, data: &mut D, handle: &mut TouchInnerHandle<'_, D>, event: &UpEvent, seq: Serial) {
        data.input_routing().backend_mut().touch_end(&self.seat);
        let routed = InputEvent::TouchUp {
            time: event.time,
            id: slot_id(event.slot),
        };
        self.route(data, handle, routed, seq);
    }

    fn motion(
        &mut self,
        data: &mut D,
        handle: &mut TouchInnerHandle<'_, D>,
        _focus: Option<(WlSurface, Point<f64, Logical>)>,
        event: &touch::MotionEvent,
        seq: Serial,
    ) {
        let routed = InputEvent::TouchMotion {
            time: event.time,
            id: slot_id(event.slot),
            location: event.location,
        };
        self.route(data, handle, routed, seq);
    }

    fn frame(&mut self, data: &mut D, handle: &mut TouchInnerHandle<'_, D>, seq: Serial) {
        self.route(data, handle, InputEvent::TouchFrame, seq);
    }

    fn cancel(&mut self, data: &mut D, handle: &mut TouchInnerHandle<'_, D>, seq: Serial) {
        self.route(data, handle, InputEvent::TouchCancel, seq);
        handle.cancel(data, seq);
    }

    fn shape(&mut self, data: &mut D, handle: &mut TouchInnerHandle<'_, D>, event: &ShapeEvent, seq: Serial) {
        handle.shape(data, event, seq);
    }

    fn orientation(&mut self, data: &mut D, handle: &mut TouchInnerHandle<'_, D>, event: &OrientationEvent, seq: Serial) {
        handle.orientation(data, event, seq);
    }

    fn start_data(&self) -> &touch::GrabStartData<D> {
        &self.start_data
    }

    fn unset(&mut self, _data: &mut D) {
        tracing::trace!(seat = %self.seat, "Touch routing grab unset");
    }
}
