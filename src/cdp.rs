//! Chrome DevTools Protocol bridge implementation.
//!
//! Drives a live tab through the `headless_chrome` crate. Page-side logic
//! (annotator overlays, scroll plumbing, the selection picker) is injected
//! as a script on attach; every bridge call is one `Runtime.evaluate` whose
//! reply comes back JSON-stringified and is parsed here.

use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions};
use log::warn;
use std::sync::Arc;
use std::time::Duration;

use crate::bridge::{
    AnnotateOptions, CaptureMetrics, Label, PageBridge, ScrollBehaviorBackup, Selection,
};
use crate::geometry::Rect;
use crate::{Error, Result};

/// Page-side support script: annotator overlays, label bookkeeping, the
/// progress badge and the interactive rectangle picker. Installed once per
/// page under `window.__pagestitch_annotator`.
const ANNOTATOR_JS: &str = r#"(function(){
  if (window.__pagestitch_annotator) return;
  const boxes = [];
  let labels = [];
  let progressEl = null;
  function pageRect(el){
    const r = el.getBoundingClientRect();
    return { left: r.left + window.scrollX, top: r.top + window.scrollY, width: r.width, height: r.height };
  }
  function urlOf(el){
    if (el.tagName === 'IMG') return el.currentSrc || el.src || '';
    if (el.tagName === 'VIDEO') {
      const src = el.currentSrc || el.src;
      if (src) return src;
      const s = el.querySelector('source');
      return (s && s.src) || '';
    }
    const bg = getComputedStyle(el).backgroundImage || '';
    const m = /url\(["']?(.*?)["']?\)/.exec(bg);
    return m ? m[1] : '';
  }
  function kindOf(el){
    if (el.tagName === 'IMG') return 'IMG';
    if (el.tagName === 'VIDEO') return 'VID';
    return 'BG';
  }
  function removeAnnotations(){
    const n = boxes.length;
    for (const b of boxes) b.remove();
    boxes.length = 0;
    labels = [];
    return n;
  }
  function inBand(r, pad){
    const top = window.scrollY - pad;
    const bottom = window.scrollY + window.innerHeight + pad;
    return r.top + r.height > top && r.top < bottom;
  }
  async function annotateAndFlush(opts){
    opts = opts || {};
    removeAnnotations();
    const pad = opts.viewportPadCss || 0;
    const els = Array.from(document.querySelectorAll('img'));
    if (opts.includeVideos !== false) els.push(...document.querySelectorAll('video'));
    if (opts.includeBackgroundImages !== false) {
      for (const el of document.querySelectorAll('div,section,a,span,li,figure')) {
        if (el.tagName !== 'IMG' && el.tagName !== 'VIDEO' && urlOf(el)) els.push(el);
      }
    }
    for (const el of els) {
      const r = pageRect(el);
      if (r.width < 2 || r.height < 2) continue;
      if (opts.onlyVisible !== false && !inBand(r, pad)) continue;
      const u = urlOf(el);
      if (!u || !/^https?:/i.test(u)) continue;
      if (opts.excludeEncoded && /^data:/i.test(u)) continue;
      if ((opts.blockedPrefixes || []).some(p => u.startsWith(p))) continue;
      const box = document.createElement('div');
      box.style.cssText = 'position:absolute;z-index:2147483646;pointer-events:none;' +
        'outline:2px solid rgba(255,80,0,.9);font:10px monospace;color:#fff;' +
        'text-shadow:0 0 2px #000;overflow:hidden';
      box.style.left = r.left + 'px';
      box.style.top = r.top + 'px';
      box.style.width = r.width + 'px';
      box.style.height = r.height + 'px';
      box.textContent = '[' + kindOf(el) + '] ' + u;
      document.body.appendChild(box);
      boxes.push(box);
      labels.push({ text: '[' + kindOf(el) + '] ' + u, pageLeft: r.left, pageTop: r.top,
                    width: r.width, height: r.height, kind: kindOf(el) });
    }
    if (opts.settleDelayMs) await new Promise(res => setTimeout(res, opts.settleDelayMs));
    return labels.length > 0;
  }
  function collectLabels(){ return labels.slice(); }
  function setProgressOverlay(text){
    if (!text) {
      if (progressEl) { progressEl.remove(); progressEl = null; }
      return;
    }
    if (!progressEl) {
      progressEl = document.createElement('div');
      progressEl.style.cssText = 'position:fixed;top:8px;right:8px;z-index:2147483647;' +
        'background:rgba(0,0,0,.75);color:#fff;padding:4px 8px;font:12px sans-serif;border-radius:4px';
      document.body.appendChild(progressEl);
    }
    progressEl.textContent = text;
  }
  async function prepareForCapture(){
    if (progressEl) progressEl.style.visibility = 'hidden';
    await new Promise(res => requestAnimationFrame(() => requestAnimationFrame(res)));
    return true;
  }
  function restoreAfterCapture(){
    if (progressEl) progressEl.style.visibility = '';
    return true;
  }
  function selectAreaOnce(){
    return new Promise(resolve => {
      const veil = document.createElement('div');
      veil.style.cssText = 'position:fixed;inset:0;z-index:2147483647;cursor:crosshair;background:rgba(0,0,0,.05)';
      const band = document.createElement('div');
      band.style.cssText = 'position:fixed;border:1px dashed #09f;background:rgba(0,128,255,.15);display:none';
      veil.appendChild(band);
      document.body.appendChild(veil);
      let sx = 0, sy = 0, active = false;
      function done(result){ veil.remove(); resolve(result ? JSON.stringify(result) : null); }
      veil.addEventListener('mousedown', e => {
        active = true; sx = e.clientX; sy = e.clientY; band.style.display = 'block';
      });
      veil.addEventListener('mousemove', e => {
        if (!active) return;
        band.style.left = Math.min(sx, e.clientX) + 'px';
        band.style.top = Math.min(sy, e.clientY) + 'px';
        band.style.width = Math.abs(e.clientX - sx) + 'px';
        band.style.height = Math.abs(e.clientY - sy) + 'px';
      });
      veil.addEventListener('mouseup', e => {
        if (!active) return done(null);
        const left = Math.min(sx, e.clientX), top = Math.min(sy, e.clientY);
        const width = Math.abs(e.clientX - sx), height = Math.abs(e.clientY - sy);
        if (width < 4 || height < 4) return done(null);
        done({ viewport: { left, top, width, height },
               page: { left: left + window.scrollX, top: top + window.scrollY, width, height },
               devicePixelRatio: window.devicePixelRatio || 1 });
      });
      window.addEventListener('keydown', function esc(e){
        if (e.key === 'Escape') { window.removeEventListener('keydown', esc); done(null); }
      });
    });
  }
  window.__pagestitch_annotator = { annotateAndFlush, collectLabels, removeAnnotations,
    setProgressOverlay, prepareForCapture, restoreAfterCapture, selectAreaOnce };
})();"#;

/// Shared scroller lookup: an explicitly tagged scroll container wins over
/// the document
const SCROLLER_JS: &str = r#"(document.querySelector('[data-pagestitch-scroller="1"]') || document.scrollingElement || document.documentElement || document.body)"#;

/// CDP-based page bridge (uses the `headless_chrome` crate)
///
/// This adapter launches a headless Chrome instance, manages a single tab,
/// and provides the `PageBridge` trait implementation over it.
pub struct CdpBridge {
    // Kept alive for the lifetime of the bridge; dropping it closes Chrome
    _browser: Browser,
    tab: Arc<Tab>,
}

impl CdpBridge {
    /// Launch a headless browser, navigate to `url`, and install the
    /// page-side annotator
    pub fn launch(url: &str) -> Result<Self> {
        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .window_size(Some((1280, 1024)))
            .build()
            .map_err(|e| Error::Initialization(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::Initialization(format!("Failed to launch browser: {}", e)))?;

        let tab = browser
            .new_tab()
            .map_err(|e| Error::Initialization(format!("Failed to create tab: {}", e)))?;

        tab.navigate_to(url)
            .map_err(|e| Error::Initialization(format!("Navigation failed: {}", e)))?;
        tab.wait_until_navigated()
            .map_err(|e| Error::Initialization(format!("Wait for navigation failed: {}", e)))?;

        // Keep the annotator alive across same-tab navigations too
        let _ = tab
            .call_method(Page::AddScriptToEvaluateOnNewDocument {
                source: ANNOTATOR_JS.to_string(),
                world_name: None,
                include_command_line_api: None,
                run_immediately: None,
            })
            .map_err(|e| warn!("Failed to persist annotator install: {}", e));

        tab.evaluate(ANNOTATOR_JS, false)
            .map_err(|e| Error::Initialization(format!("Annotator install failed: {}", e)))?;

        Ok(Self { _browser: browser, tab })
    }

    /// Close the tab and shut the browser down
    pub fn close(self) -> Result<()> {
        self.tab
            .close(true)
            .map_err(|e| Error::Bridge(format!("Tab close failed: {}", e)))?;
        Ok(())
    }

    fn eval(&self, script: &str, await_promise: bool) -> Result<serde_json::Value> {
        let result = self
            .tab
            .evaluate(script, await_promise)
            .map_err(|e| Error::Bridge(format!("Evaluation failed: {}", e)))?;
        Ok(result.value.unwrap_or(serde_json::Value::Null))
    }

    /// Evaluate a script whose reply is JSON-stringified on the page side
    fn eval_json(&self, script: &str, await_promise: bool) -> Result<serde_json::Value> {
        let val = self.eval(script, await_promise)?;
        match val.as_str() {
            Some(s) => serde_json::from_str(s)
                .map_err(|e| Error::Bridge(format!("Malformed page reply: {}", e))),
            None => Ok(val),
        }
    }

    fn eval_f64(&self, script: &str) -> Result<f64> {
        Ok(self.eval(script, false)?.as_f64().unwrap_or(0.0))
    }

    fn annotator_call(&self, call: &str, await_promise: bool) -> Result<serde_json::Value> {
        let script = format!(
            "window.__pagestitch_annotator ? window.__pagestitch_annotator.{} : null",
            call
        );
        self.eval(&script, await_promise)
    }
}

fn field(v: &serde_json::Value, key: &str) -> f64 {
    v.get(key).and_then(|x| x.as_f64()).unwrap_or(0.0)
}

fn rect_field(v: &serde_json::Value, key: &str) -> Rect<crate::geometry::Css> {
    let r = v.get(key).cloned().unwrap_or(serde_json::Value::Null);
    Rect::new(
        field(&r, "left"),
        field(&r, "top"),
        field(&r, "width"),
        field(&r, "height"),
    )
}

impl PageBridge for CdpBridge {
    fn metrics(&mut self) -> Result<CaptureMetrics> {
        let script = format!(
            r#"(function(){{
                const de = document.documentElement;
                const body = document.body;
                const s = {scroller};
                return JSON.stringify({{
                    totalWidth: Math.max(de.scrollWidth, body ? body.scrollWidth : 0),
                    totalHeight: Math.max(de.scrollHeight, body ? body.scrollHeight : 0, s ? s.scrollHeight : 0),
                    viewportWidth: window.innerWidth,
                    viewportHeight: window.innerHeight,
                    dpr: window.devicePixelRatio || 1,
                    scrollX: window.scrollX || 0,
                    scrollY: (s && s.scrollTop) || window.scrollY || 0
                }});
            }})()"#,
            scroller = SCROLLER_JS
        );
        let v = self.eval_json(&script, false)?;
        Ok(CaptureMetrics {
            total_width: field(&v, "totalWidth"),
            total_height: field(&v, "totalHeight"),
            viewport_width: field(&v, "viewportWidth"),
            viewport_height: field(&v, "viewportHeight"),
            dpr: field(&v, "dpr"),
            scroll_x: field(&v, "scrollX"),
            scroll_y: field(&v, "scrollY"),
        })
    }

    fn document_height(&mut self) -> Result<f64> {
        let script = format!(
            "Math.max(document.documentElement.scrollHeight, document.body ? document.body.scrollHeight : 0, {}.scrollHeight || 0)",
            SCROLLER_JS
        );
        self.eval_f64(&script)
    }

    fn scroll_to(&mut self, y: f64) -> Result<()> {
        let script = format!(
            r#"(function(y){{
                const s = {scroller};
                try {{ s.scrollTo ? s.scrollTo({{ top: y, left: 0, behavior: 'auto' }}) : (s.scrollTop = y); }} catch (err) {{}}
                try {{ s.scrollTop = y; }} catch (err) {{}}
                try {{ window.scrollTo({{ top: y, left: 0, behavior: 'auto' }}); }} catch (err) {{}}
            }})({y})"#,
            scroller = SCROLLER_JS,
            y = y
        );
        self.eval(&script, false)?;
        Ok(())
    }

    fn scroll_position(&mut self) -> Result<(f64, f64)> {
        let script = format!(
            r#"(function(){{
                const s = {scroller};
                const winY = (typeof window.scrollY === 'number') ? window.scrollY : 0;
                const y = (s && typeof s.scrollTop === 'number' ? s.scrollTop : 0) || winY || 0;
                return JSON.stringify([window.scrollX || 0, y]);
            }})()"#,
            scroller = SCROLLER_JS
        );
        let v = self.eval_json(&script, false)?;
        let x = v.get(0).and_then(|n| n.as_f64()).unwrap_or(0.0);
        let y = v.get(1).and_then(|n| n.as_f64()).unwrap_or(0.0);
        Ok((x, y))
    }

    fn dispatch_scroll_gesture(&mut self, delta_y: f64) -> Result<()> {
        // A real wheel event reaches scroll handlers and cross-origin frame
        // content that programmatic scrolling misses
        let script = format!(
            r#"(function(delta){{
                const cx = Math.floor(window.innerWidth / 2);
                const cy = Math.floor(window.innerHeight / 2);
                const ev = new WheelEvent('wheel', {{ deltaY: delta, clientX: cx, clientY: cy, bubbles: true, cancelable: true }});
                const el = document.elementFromPoint(cx, cy) || document.body;
                (el || document).dispatchEvent(ev);
            }})({})"#,
            delta_y
        );
        self.eval(&script, false)?;
        Ok(())
    }

    fn settle_frames(&mut self) -> Result<()> {
        self.eval(
            "new Promise(res => requestAnimationFrame(() => requestAnimationFrame(() => res(true))))",
            true,
        )?;
        Ok(())
    }

    fn force_repaint(&mut self) -> Result<()> {
        self.eval(
            r#"(function(){
                const de = document.documentElement;
                const prev = de.style.transform;
                de.style.transform = 'translateZ(0)';
                void de.offsetHeight;
                de.style.transform = prev;
            })()"#,
            false,
        )?;
        Ok(())
    }

    fn disable_smooth_scroll(&mut self) -> Result<ScrollBehaviorBackup> {
        let script = format!(
            r#"(function(){{
                const html = document.documentElement;
                const body = document.body;
                const s = {scroller};
                const backup = {{
                    htmlScrollBehavior: html ? html.style.scrollBehavior : null,
                    bodyScrollBehavior: body ? body.style.scrollBehavior : null,
                    htmlSnap: html ? html.style.scrollSnapType : null,
                    scrollerScrollBehavior: (s && s.style) ? s.style.scrollBehavior : null,
                    scrollerSnap: (s && s.style) ? s.style.scrollSnapType : null
                }};
                if (html) {{ html.style.scrollBehavior = 'auto'; html.style.scrollSnapType = 'none'; }}
                if (body) body.style.scrollBehavior = 'auto';
                if (s && s.style) {{ s.style.scrollBehavior = 'auto'; s.style.scrollSnapType = 'none'; }}
                return JSON.stringify(backup);
            }})()"#,
            scroller = SCROLLER_JS
        );
        let v = self.eval_json(&script, false)?;
        serde_json::from_value(v).map_err(|e| Error::Bridge(format!("Malformed style backup: {}", e)))
    }

    fn restore_scroll_behavior(&mut self, backup: &ScrollBehaviorBackup) -> Result<()> {
        let json = serde_json::to_string(backup)
            .map_err(|e| Error::Bridge(format!("Backup serialization failed: {}", e)))?;
        let script = format!(
            r#"(function(b){{
                const html = document.documentElement;
                const body = document.body;
                const s = {scroller};
                if (html) {{
                    html.style.scrollBehavior = b.htmlScrollBehavior || '';
                    html.style.scrollSnapType = b.htmlSnap || '';
                }}
                if (body) body.style.scrollBehavior = b.bodyScrollBehavior || '';
                if (s && s.style) {{
                    s.style.scrollBehavior = b.scrollerScrollBehavior || '';
                    s.style.scrollSnapType = b.scrollerSnap || '';
                }}
            }})({json})"#,
            scroller = SCROLLER_JS,
            json = json
        );
        self.eval(&script, false)?;
        Ok(())
    }

    fn annotate_and_flush(
        &mut self,
        options: &AnnotateOptions,
        _broad: bool,
        timeout_ms: u64,
    ) -> Result<bool> {
        let opts = serde_json::to_string(options)
            .map_err(|e| Error::Bridge(format!("Options serialization failed: {}", e)))?;
        // Bound the page-side wait so a stalled annotator degrades to an
        // empty pass instead of hanging the run
        let script = format!(
            r#"Promise.race([
                (window.__pagestitch_annotator ? window.__pagestitch_annotator.annotateAndFlush({opts}) : Promise.resolve(false)),
                new Promise(res => setTimeout(() => res(false), {timeout}))
            ])"#,
            opts = opts,
            timeout = timeout_ms
        );
        Ok(self.eval(&script, true)?.as_bool().unwrap_or(false))
    }

    fn collect_labels(&mut self, _broad: bool, _timeout_ms: u64) -> Result<Vec<Label>> {
        let v = self.eval_json(
            "JSON.stringify(window.__pagestitch_annotator ? window.__pagestitch_annotator.collectLabels() : [])",
            false,
        )?;
        serde_json::from_value(v).map_err(|e| Error::Bridge(format!("Malformed label list: {}", e)))
    }

    fn remove_annotations(&mut self) -> Result<usize> {
        let v = self.annotator_call("removeAnnotations()", false)?;
        Ok(v.as_u64().unwrap_or(0) as usize)
    }

    fn prepare_for_capture(&mut self) -> Result<()> {
        self.annotator_call("prepareForCapture()", true)?;
        Ok(())
    }

    fn restore_after_capture(&mut self) -> Result<()> {
        self.annotator_call("restoreAfterCapture()", false)?;
        Ok(())
    }

    fn set_progress(&mut self, text: &str) {
        let quoted = serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string());
        let _ = self
            .annotator_call(&format!("setProgressOverlay({})", quoted), false)
            .map_err(|e| warn!("Progress update failed: {}", e));
    }

    fn capture_viewport(&mut self) -> Result<Vec<u8>> {
        self.tab
            .capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(|e| {
                let text = e.to_string();
                if text.contains("quota") || text.contains("Quota") {
                    Error::CaptureQuota
                } else {
                    Error::Bridge(format!("Screenshot failed: {}", text))
                }
            })
    }

    fn select_area_once(&mut self) -> Result<Option<Selection>> {
        // The picker waits on the user; give it a generous window
        self.tab.set_default_timeout(Duration::from_secs(120));
        let result = self.eval_json(
            "window.__pagestitch_annotator ? window.__pagestitch_annotator.selectAreaOnce() : null",
            true,
        );
        self.tab.set_default_timeout(Duration::from_secs(20));
        let v = result?;
        if v.is_null() {
            return Ok(None);
        }
        Ok(Some(Selection {
            viewport: rect_field(&v, "viewport"),
            page: rect_field(&v, "page"),
            device_pixel_ratio: field(&v, "devicePixelRatio").max(1.0),
        }))
    }

    fn scrollbar_width_css(&mut self) -> Result<f64> {
        self.eval_f64(
            r#"(function(){
                const de = document.documentElement;
                const w = (typeof window.innerWidth === 'number') ? window.innerWidth : 0;
                const c = (de && typeof de.clientWidth === 'number') ? de.clientWidth : 0;
                return Math.max(0, w - c);
            })()"#,
        )
    }

    fn viewport_inner_width(&mut self) -> Result<f64> {
        self.eval_f64("window.innerWidth")
    }

    fn is_alive(&mut self) -> bool {
        self.tab.evaluate("true", false).is_ok()
    }
}
