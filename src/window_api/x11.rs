use anyhow::{anyhow, Result};
use tracing::instrument;
use xcb::{
    x::{self, Atom, GetProperty, InternAtom, Window, ATOM_ANY},
    Connection, Xid,
};

use super::{resolve_app_name, ActiveWindowData, WindowManager};

fn intern_atom(conn: &Connection, name: &[u8]) -> Result<Atom> {
    let reply = conn.wait_for_reply(conn.send_request(&InternAtom {
        only_if_exists: false,
        name,
    }))?;
    Ok(reply.atom())
}

fn get_active_window(conn: &Connection, root: Window, active_window_atom: Atom) -> Result<Option<Window>> {
    let result = conn.wait_for_reply(conn.send_request(&GetProperty {
        delete: false,
        window: root,
        property: active_window_atom,
        r#type: ATOM_ANY,
        long_offset: 0,
        long_length: 1,
    }))?;
    Ok(result
        .value::<Window>()
        .first()
        .copied()
        .filter(|window| !window.is_none()))
}

fn get_text_property(conn: &Connection, window: Window, property: Atom) -> Result<Vec<u8>> {
    let reply = conn.wait_for_reply(conn.send_request(&GetProperty {
        delete: false,
        window,
        property,
        r#type: ATOM_ANY,
        long_offset: 0,
        long_length: 1024,
    }))?;
    Ok(reply.value::<u8>().to_vec())
}

/// WM_CLASS holds two NUL-terminated strings: the instance name followed by the class.
fn split_wm_class(raw: &[u8]) -> (Option<String>, Option<String>) {
    let mut parts = raw
        .split(|b| *b == 0)
        .map(|v| String::from_utf8_lossy(v).into_owned());
    let instance = parts.next().filter(|v| !v.is_empty());
    let class = parts.next().filter(|v| !v.is_empty());
    (instance, class)
}

pub struct LinuxWindowManager {
    connection: Connection,
    preferred_screen: i32,
    active_window_atom: Atom,
    net_wm_name_atom: Atom,
}

impl LinuxWindowManager {
    pub fn new() -> Result<Self> {
        let (connection, preferred_screen) = xcb::Connection::connect(None)?;
        let active_window_atom = intern_atom(&connection, b"_NET_ACTIVE_WINDOW")?;
        let net_wm_name_atom = intern_atom(&connection, b"_NET_WM_NAME")?;
        Ok(Self {
            connection,
            preferred_screen,
            active_window_atom,
            net_wm_name_atom,
        })
    }

    fn window_title(&self, window: Window) -> Result<Option<String>> {
        for atom in [self.net_wm_name_atom, x::ATOM_WM_NAME] {
            let raw = get_text_property(&self.connection, window, atom)?;
            if !raw.is_empty() {
                return Ok(Some(String::from_utf8_lossy(&raw).into_owned()));
            }
        }
        Ok(None)
    }

    #[instrument(skip(self))]
    fn get_active_inner(&self) -> Result<Option<ActiveWindowData>> {
        let setup = self.connection.get_setup();

        // Currently the application only supports 1 x11 screen.
        let root = setup
            .roots()
            .nth(self.preferred_screen.max(0) as usize)
            .ok_or_else(|| anyhow!("Screen {} is not available", self.preferred_screen))?
            .root();

        let Some(active_window) = get_active_window(&self.connection, root, self.active_window_atom)?
        else {
            return Ok(None);
        };

        let (instance, class) =
            split_wm_class(&get_text_property(&self.connection, active_window, x::ATOM_WM_CLASS)?);
        let title = self.window_title(active_window)?;

        let Some(app_name) =
            resolve_app_name(class.as_deref(), instance.as_deref(), title.as_deref())
        else {
            return Ok(None);
        };

        Ok(Some(ActiveWindowData {
            app_name: app_name.into(),
            window_title: title.unwrap_or_default().into(),
        }))
    }
}

impl WindowManager for LinuxWindowManager {
    #[instrument(skip(self))]
    fn get_active_window_data(&mut self) -> Result<Option<ActiveWindowData>> {
        self.get_active_inner()
    }
}
