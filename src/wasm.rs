use wasm_bindgen::prelude::*;

use crate::api::types::{ParaphraseStyle, WorkerEvent};
use crate::app::session::{Outbox, Session};
use crate::core::SessionError;
use crate::envconfig::Config;

fn to_js(err: SessionError) -> JsValue {
    JsValue::from_str(&err.to_string())
}

/// Session driven from JS: feed it the worker's `message` payloads and
/// forward whatever `take_commands` returns with `worker.postMessage`.
#[wasm_bindgen]
pub struct WasmSession {
    inner: Session<Outbox>,
}

#[wasm_bindgen]
impl WasmSession {
    #[wasm_bindgen(constructor)]
    pub fn new(strict: bool) -> WasmSession {
        let config = Config {
            strict,
            ..Config::default()
        };
        WasmSession {
            inner: Session::new(&config),
        }
    }

    pub fn attach(&mut self) -> Result<(), JsValue> {
        self.inner.attach(Outbox::new()).map_err(to_js)
    }

    pub fn load(&mut self) -> Result<(), JsValue> {
        self.inner.load().map_err(to_js)
    }

    pub fn set_input(&mut self, text: &str) {
        self.inner.set_input(text);
    }

    pub fn set_image(&mut self, image: Option<String>) {
        self.inner.set_image(image);
    }

    pub fn submit(&mut self) -> Result<(), JsValue> {
        self.inner.submit().map_err(to_js)
    }

    pub fn paraphrase(&mut self, text: &str, style: &str) -> Result<(), JsValue> {
        let style: ParaphraseStyle = style.parse().map_err(to_js)?;
        self.inner.paraphrase_text(text, style).map_err(to_js)
    }

    pub fn interrupt(&mut self) -> Result<bool, JsValue> {
        self.inner.interrupt().map_err(to_js)
    }

    pub fn clear(&mut self) -> Result<(), JsValue> {
        self.inner.clear().map_err(to_js)
    }

    /// Takes `event.data` from the worker's `message` event. Image blobs
    /// must already be in the `{type, data: base64}` wire shape.
    pub fn handle_message(&mut self, data: JsValue) -> Result<(), JsValue> {
        let value: serde_json::Value = serde_wasm_bindgen::from_value(data)?;
        match WorkerEvent::from_value(value) {
            Ok(event) => self.inner.handle_event(event).map_err(to_js),
            Err(e) if !e.is_protocol_violation() => Err(to_js(e)),
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed worker message");
                Ok(())
            }
        }
    }

    pub fn handle_json(&mut self, json: &str) -> Result<(), JsValue> {
        self.inner.handle_json(json).map_err(to_js)
    }

    /// Commands queued since the last call, as plain objects.
    pub fn take_commands(&mut self) -> Result<JsValue, JsValue> {
        let commands = match self.inner.worker_mut() {
            Some(outbox) => outbox.drain(),
            None => Vec::new(),
        };
        Ok(serde_wasm_bindgen::to_value(&commands)?)
    }

    pub fn snapshot(&self) -> Result<JsValue, JsValue> {
        Ok(serde_wasm_bindgen::to_value(&self.inner.snapshot())?)
    }

    pub fn status_line(&self) -> String {
        self.inner.status().to_string()
    }

    pub fn state(&self) -> String {
        self.inner.state().to_string()
    }

    pub fn dispose(&mut self) {
        self.inner.dispose();
    }
}
