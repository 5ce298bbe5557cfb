//! The `ivi_input` management global.
//!
//! Requests are forwarded to [`InputRouting`]; every bound resource is a
//! management client receiving the state replay and all later broadcasts.

use std::sync::OnceLock;

use smithay::reexports::wayland_server::{
    backend::{ClientId, GlobalId},
    Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch, New, Resource,
};

use crate::{
    backend::Backend,
    handlers::control::ControlEvent,
    signal::ListenerToken,
    state::{DeviceClass, InputRouting},
};

#[allow(non_upper_case_globals, non_camel_case_types, unused_imports, missing_docs, clippy::all)]
pub mod server {
    use smithay::reexports::wayland_server;
    use smithay::reexports::wayland_server::protocol::*;

    pub mod __interfaces {
        use smithay::reexports::wayland_server::backend as wayland_backend;
        use smithay::reexports::wayland_server::protocol::__interfaces::*;
        wayland_scanner::generate_interfaces!("resources/ivi-input.xml");
    }
    use self::__interfaces::*;

    wayland_scanner::generate_server_code!("resources/ivi-input.xml");
}

use server::ivi_input::{self, IviInput};

const VERSION: u32 = 1;

pub struct IviInputState {
    global: GlobalId,
}

/// Decides which clients may see and bind the global.
pub struct IviInputGlobalData {
    filter: Box<dyn Fn(&Client) -> bool + Send + Sync>,
}

impl IviInputGlobalData {
    pub fn new<F>(filter: F) -> Self
    where
        F: Fn(&Client) -> bool + Send + Sync + 'static,
    {
        Self {
            filter: Box::new(filter),
        }
    }

    pub fn can_view(&self, client: &Client) -> bool {
        (self.filter)(client)
    }
}

/// Per-resource data: the broadcast subscription of the bound client.
#[derive(Debug, Default)]
pub struct IviInputData {
    token: OnceLock<ListenerToken>,
}

impl IviInputData {
    /// Ties the subscription to the resource. Fails if one is attached already.
    pub fn attach(&self, token: ListenerToken) -> bool {
        self.token.set(token).is_ok()
    }

    pub fn token(&self) -> Option<ListenerToken> {
        self.token.get().copied()
    }

    pub fn release<B: Backend>(&self, routing: &mut InputRouting<B>) {
        if let Some(token) = self.token() {
            routing.unbind_client(token);
        }
    }
}

pub trait IviInputHandler {
    type Backend: Backend;

    fn input_routing(&mut self) -> &mut InputRouting<Self::Backend>;

    /// Called after a management request or bind changed routing state.
    ///
    /// Compositors whose backend defers native work apply it here.
    fn routing_changed(&mut self) {}
}

impl IviInputState {
    pub fn new<D, F>(display: &DisplayHandle, filter: F) -> Self
    where
        D: GlobalDispatch<IviInput, IviInputGlobalData>,
        D: Dispatch<IviInput, IviInputData>,
        D: IviInputHandler,
        D: 'static,
        F: Fn(&Client) -> bool + Send + Sync + 'static,
    {
        let global = display.create_global::<D, IviInput, _>(VERSION, IviInputGlobalData::new(filter));
        Self { global }
    }

    pub fn global(&self) -> GlobalId {
        self.global.clone()
    }
}

impl<D> GlobalDispatch<IviInput, IviInputGlobalData, D> for IviInputState
where
    D: GlobalDispatch<IviInput, IviInputGlobalData>,
    D: Dispatch<IviInput, IviInputData>,
    D: IviInputHandler,
    D: 'static,
{
    fn bind(
        state: &mut D,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<IviInput>,
        _global_data: &IviInputGlobalData,
        data_init: &mut DataInit<'_, D>,
    ) {
        let data = IviInputData::default();
        let manager = data_init.init(resource, data);
        let sink = manager.clone();
        let token = state
            .input_routing()
            .bind_client(move |event| send_event(&sink, event));
        let attached = manager
            .data::<IviInputData>()
            .is_some_and(|data| data.attach(token));
        if !attached {
            tracing::warn!(?token, "Management resource without its data, unbinding");
            state.input_routing().unbind_client(token);
        }
        state.routing_changed();
    }

    fn can_view(client: Client, global_data: &IviInputGlobalData) -> bool {
        global_data.can_view(&client)
    }
}

impl<D> Dispatch<IviInput, IviInputData, D> for IviInputState
where
    D: Dispatch<IviInput, IviInputData>,
    D: IviInputHandler,
    D: 'static,
{
    fn request(
        state: &mut D,
        _client: &Client,
        _resource: &IviInput,
        request: ivi_input::Request,
        _data: &IviInputData,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, D>,
    ) {
        match request {
            ivi_input::Request::SetInputFocus {
                surface,
                device,
                enabled,
            } => state.input_routing().set_input_focus(
                surface,
                DeviceClass::from_bits_truncate(device),
                enabled != 0,
            ),
            ivi_input::Request::SetInputAcceptance {
                surface,
                seat,
                accepted,
            } => state
                .input_routing()
                .set_input_acceptance(surface, &seat, accepted != 0),
            ivi_input::Request::Destroy => return,
            _ => return,
        }
        state.routing_changed();
    }

    fn destroyed(state: &mut D, _client: ClientId, _resource: &IviInput, data: &IviInputData) {
        data.release(state.input_routing());
    }
}

/// A [`ControlEvent`] as its `ivi_input` event arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
enum WireEvent {
    SeatCreated { name: String, capabilities: u32 },
    SeatCapabilities { name: String, capabilities: u32 },
    SeatDestroyed { name: String },
    InputFocus { surface: u32, device: u32, enabled: i32 },
    InputAcceptance { surface: u32, seat: String, accepted: i32 },
}

fn encode(event: &ControlEvent) -> WireEvent {
    match event {
        ControlEvent::SeatCreated { name, capabilities } => WireEvent::SeatCreated {
            name: name.clone(),
            capabilities: capabilities.bits(),
        },
        ControlEvent::SeatCapabilities { name, capabilities } => WireEvent::SeatCapabilities {
            name: name.clone(),
            capabilities: capabilities.bits(),
        },
        ControlEvent::SeatDestroyed { name } => WireEvent::SeatDestroyed { name: name.clone() },
        ControlEvent::InputFocus {
            surface,
            device,
            enabled,
        } => WireEvent::InputFocus {
            surface: *surface,
            device: device.bits(),
            enabled: i32::from(*enabled),
        },
        ControlEvent::InputAcceptance {
            surface,
            seat,
            accepted,
        } => WireEvent::InputAcceptance {
            surface: *surface,
            seat: seat.clone(),
            accepted: i32::from(*accepted),
        },
    }
}

fn send_event(manager: &IviInput, event: &ControlEvent) {
    match encode(event) {
        WireEvent::SeatCreated { name, capabilities } => manager.seat_created(name, capabilities),
        WireEvent::SeatCapabilities { name, capabilities } => manager.seat_capabilities(name, capabilities),
        WireEvent::SeatDestroyed { name } => manager.seat_destroyed(name),
        WireEvent::InputFocus {
            surface,
            device,
            enabled,
        } => manager.input_focus(surface, device, enabled),
        WireEvent::InputAcceptance {
            surface,
            seat,
            accepted,
        } => manager.input_acceptance(surface, seat, accepted),
    }
}

#[macro_export]
macro_rules! delegate_ivi_input {
    ($(@<$( $lt:tt $( : $clt:tt $(+ $dlt:tt )* )? ),+>)? $ty: ty) => {
        smithay::reexports::wayland_server::delegate_global_dispatch!($(@< $( $lt $( : $clt $(+ $dlt )* )? ),+ >)? $ty: [
            $crate::protocols::ivi_input::server::ivi_input::IviInput: $crate::protocols::ivi_input::IviInputGlobalData
        ] => $crate::protocols::ivi_input::IviInputState);
        smithay::reexports::wayland_server::delegate_dispatch!($(@< $( $lt $( : $clt $(+ $dlt )* )? ),+ >)? $ty: [
            $crate::protocols::ivi_input::server::ivi_input::IviInput: $crate::protocols::ivi_input::IviInputData
        ] => $crate::protocols::ivi_input::IviInputState);
    };
}

#[cfg(test)]
mod tests {
    use std::{os::unix::net::UnixStream, sync::Arc};

    use smithay::reexports::wayland_server::{backend::ClientData, Display};

    use super::*;
    use crate::{config::Config, headless::Headless};

    struct Privileged;
    impl ClientData for Privileged {}

    struct Ordinary;
    impl ClientData for Ordinary {}

    #[test]
    fn events_carry_wire_values() {
        let created = ControlEvent::SeatCreated {
            name: "default".into(),
            capabilities: DeviceClass::KEYBOARD | DeviceClass::TOUCH,
        };
        assert_eq!(
            encode(&created),
            WireEvent::SeatCreated {
                name: "default".into(),
                capabilities: 5,
            }
        );

        let focus = ControlEvent::InputFocus {
            surface: 12,
            device: DeviceClass::POINTER,
            enabled: true,
        };
        assert_eq!(
            encode(&focus),
            WireEvent::InputFocus {
                surface: 12,
                device: 2,
                enabled: 1,
            }
        );

        let revoked = ControlEvent::InputAcceptance {
            surface: 12,
            seat: "knob".into(),
            accepted: false,
        };
        assert_eq!(
            encode(&revoked),
            WireEvent::InputAcceptance {
                surface: 12,
                seat: "knob".into(),
                accepted: 0,
            }
        );

        let gone = ControlEvent::SeatDestroyed { name: "knob".into() };
        assert_eq!(encode(&gone), WireEvent::SeatDestroyed { name: "knob".into() });
    }

    #[test]
    fn global_is_visible_to_filtered_clients_only() {
        let display: Display<()> = Display::new().unwrap();
        let mut handle = display.handle();
        let (privileged, _peer) = UnixStream::pair().unwrap();
        let (ordinary, _other_peer) = UnixStream::pair().unwrap();
        let privileged = handle.insert_client(privileged, Arc::new(Privileged)).unwrap();
        let ordinary = handle.insert_client(ordinary, Arc::new(Ordinary)).unwrap();

        let global_data = IviInputGlobalData::new(|client: &Client| client.get_data::<Privileged>().is_some());

        assert!(global_data.can_view(&privileged));
        assert!(!global_data.can_view(&ordinary));
    }

    #[test]
    fn resource_holds_one_subscription() {
        let mut routing = InputRouting::new(Config::default(), Headless::new());
        let first = routing.bind_client(|_| {});
        let second = routing.bind_client(|_| {});
        let data = IviInputData::default();

        assert!(data.token().is_none());
        assert!(data.attach(first));
        assert!(!data.attach(second));
        assert_eq!(data.token(), Some(first));
    }

    #[test]
    fn destroyed_resource_unbinds_its_client() {
        let mut routing = InputRouting::new(Config::default(), Headless::new());
        let data = IviInputData::default();
        assert!(data.attach(routing.bind_client(|_| {})));
        let _other = routing.bind_client(|_| {});
        assert_eq!(routing.client_count(), 2);

        data.release(&mut routing);

        assert_eq!(routing.client_count(), 1);
    }

    #[test]
    fn releasing_unattached_data_keeps_clients() {
        let mut routing = InputRouting::new(Config::default(), Headless::new());
        let _client = routing.bind_client(|_| {});

        IviInputData::default().release(&mut routing);

        assert_eq!(routing.client_count(), 1);
    }
}
