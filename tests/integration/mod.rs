// Shared fixtures for the integration suite.
//
// `FakePortal` is an in-memory `BrowserSession` that renders HTML snapshots
// of the sign-in, appointment and calendar pages and resolves locators with
// the `scraper` crate, so navigation and extraction run without Chrome.


use async_trait::async_trait;
use mockall::mock;
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use visa_slot_watcher::calendar::CalendarExtractor;
use visa_slot_watcher::models::{CalendarDate, Credentials, ScheduleTarget};
use visa_slot_watcher::navigator::{PortalUrls, SessionNavigator};
use visa_slot_watcher::notifiers::{NotificationResult, Notifier};
use visa_slot_watcher::scraper::{BrowserSession, ElementHandle, Locator, SessionFactory};
use visa_slot_watcher::utils::error::{AppError, Result};
use visa_slot_watcher::ScanOrchestrator;

pub const BASE_URL: &str = "http://portal.test/en-ca/niv";
pub const PROFILE_ID: &str = "69145711";
pub const RECIPIENT: &str = "987654";
pub const ELEMENT_TIMEOUT: Duration = Duration::from_millis(30);

mock! {
    pub Transport {}

    #[async_trait]
    impl Notifier for Transport {
        async fn send(&self, recipient: &str, text: &str) -> Result<NotificationResult>;
    }
}

pub fn delivered() -> Result<NotificationResult> {
    Ok(NotificationResult {
        success: true,
        message_id: Some("1".to_string()),
        error: None,
    })
}

pub fn date(s: &str) -> CalendarDate {
    s.parse().unwrap()
}

/// One month of the date-picker.
#[derive(Debug, Clone)]
pub struct MonthPage {
    pub title: String,
    pub open_days: Vec<u32>,
}

pub fn month(title: &str, open_days: &[u32]) -> MonthPage {
    MonthPage {
        title: title.to_string(),
        open_days: open_days.to_vec(),
    }
}

/// `count` consecutive months starting at January of `year`, all fully booked.
pub fn booked_months(year: i32, count: usize) -> Vec<MonthPage> {
    const NAMES: [&str; 12] = [
        "January", "February", "March", "April", "May", "June", "July", "August", "September",
        "October", "November", "December",
    ];
    (0..count)
        .map(|i| month(&format!("{} {}", NAMES[i % 12], year + (i / 12) as i32), &[]))
        .collect()
}

/// How the fake portal behaves for every session it serves.
#[derive(Debug, Clone)]
pub struct PortalScript {
    /// Sign-in page shows a landing screen with a "Sign In" link first.
    pub splash: bool,
    /// The login form ever renders.
    pub login_form: bool,
    pub consent_checkbox: bool,
    /// The appointment page carries the date input and calendar trigger.
    pub calendar_available: bool,
    pub months: Vec<MonthPage>,
    /// The next-month control is disabled on the last month.
    pub disable_last: bool,
    /// URL reads after the submit click before the login POST lands.
    pub login_latency: usize,
}

impl PortalScript {
    pub fn with_months(months: Vec<MonthPage>) -> Self {
        Self {
            splash: false,
            login_form: true,
            consent_checkbox: true,
            calendar_available: true,
            months,
            disable_last: true,
            login_latency: 1,
        }
    }
}

/// What happened across all sessions a launcher handed out.
#[derive(Debug, Default)]
pub struct SessionLog {
    pub opened: usize,
    pub closed: usize,
    pub visited: Vec<String>,
    pub typed: HashMap<String, String>,
    pub consent_checked: bool,
    pub screenshots: usize,
    /// Logins abandoned because another page was loaded mid-submit.
    pub cancelled_logins: usize,
}

pub type SharedLog = Arc<Mutex<SessionLog>>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum View {
    Blank,
    Splash,
    Login,
    Home,
    Appointment { calendar_open: bool },
}

#[derive(Debug)]
struct PageState {
    view: View,
    url: String,
    logged_in: bool,
    pending_login: Option<usize>,
    month: usize,
}

/// Attributes of a matched element, enough to dispatch clicks.
#[derive(Debug, Clone)]
struct Matched {
    id: Option<String>,
    name: Option<String>,
    class: Option<String>,
    text: String,
}

pub struct FakePortal {
    script: PortalScript,
    state: Mutex<PageState>,
    log: SharedLog,
    closed: bool,
}

impl FakePortal {
    pub fn new(script: PortalScript, log: SharedLog) -> Self {
        Self {
            script,
            state: Mutex::new(PageState {
                view: View::Blank,
                url: "about:blank".to_string(),
                logged_in: false,
                pending_login: None,
                month: 0,
            }),
            log,
            closed: false,
        }
    }

    fn land_login(state: &mut PageState) {
        state.pending_login = None;
        state.logged_in = true;
        state.view = View::Home;
        state.url = format!("{}/groups/1", BASE_URL);
    }

    fn next_disabled(&self, month: usize) -> bool {
        self.script.disable_last && month + 1 >= self.script.months.len()
    }

    fn render(&self) -> String {
        let state = self.state.lock().unwrap();
        let body = match &state.view {
            View::Blank => String::new(),
            View::Splash => r#"<div class="homeSelectionsContainer"><a class="down-arrow" href="/en-ca/niv/users/sign_in">Sign In</a></div>"#.to_string(),
            View::Login => {
                let consent = if self.script.consent_checkbox {
                    r#"<div class="icheckbox"><input type="checkbox" id="policy_confirmed" name="policy_confirmed"><ins class="iCheck-helper"></ins></div>"#
                } else {
                    ""
                };
                format!(
                    r#"<form id="sign_in_form"><input type="email" id="user_email"><input type="password" id="user_password">{}<input type="submit" name="commit" value="Sign In"></form>"#,
                    consent
                )
            }
            View::Home => "<h1>Groups</h1>".to_string(),
            View::Appointment { calendar_open } => {
                if !self.script.calendar_available {
                    "<p>There are no available appointments at this time.</p>".to_string()
                } else {
                    let widget = if *calendar_open { self.render_calendar(state.month) } else { String::new() };
                    format!(
                        r##"<input id="appointments_consulate_appointment_date" readonly><li id="appointments_consulate_appointment_date_input"><a href="#">calendar</a></li>{}"##,
                        widget
                    )
                }
            }
        };
        format!("<html><body>{}</body></html>", body)
    }

    fn render_calendar(&self, index: usize) -> String {
        let Some(page) = self.script.months.get(index) else {
            return String::new();
        };
        let next_class = if self.next_disabled(index) {
            "ui-datepicker-next ui-corner-all ui-state-disabled"
        } else {
            "ui-datepicker-next ui-corner-all"
        };
        let mut cells = String::new();
        for day in 1..=28 {
            if page.open_days.contains(&day) {
                cells.push_str(&format!(r##"<td><a class="ui-state-default" href="#">{}</a></td>"##, day));
            } else {
                cells.push_str(&format!(r#"<td class="ui-state-disabled"><span class="ui-state-default">{}</span></td>"#, day));
            }
        }
        format!(
            r#"<div id="ui-datepicker-div"><div class="ui-datepicker-header"><a class="{}" title="Next">Next</a><div class="ui-datepicker-title">{}</div></div><table class="ui-datepicker-calendar"><tbody><tr>{}</tr></tbody></table></div>"#,
            next_class, page.title, cells
        )
    }

    fn matches(&self, locator: &Locator) -> Result<Vec<Matched>> {
        let html = Html::parse_document(&self.render());
        let (css, text_fragment) = match locator {
            Locator::Css(css) => (css.as_str(), None),
            Locator::LinkText(text) => ("a", Some(text.as_str())),
            Locator::Xpath(_) => return Ok(Vec::new()),
        };
        let selector = Selector::parse(css).map_err(|e| AppError::browser(format!("bad selector {}: {:?}", css, e)))?;

        Ok(html
            .select(&selector)
            .map(|el| Matched {
                id: el.value().attr("id").map(str::to_string),
                name: el.value().attr("name").map(str::to_string),
                class: el.value().attr("class").map(str::to_string),
                text: el.text().collect::<String>(),
            })
            .filter(|m| text_fragment.is_none_or(|t| m.text.contains(t)))
            .collect())
    }

    fn resolve(&self, element: &ElementHandle) -> Result<Matched> {
        self.matches(&element.locator)?
            .into_iter()
            .nth(element.index)
            .ok_or_else(|| AppError::browser(format!("stale element {}", element.locator)))
    }

    fn has_class(matched: &Matched, class: &str) -> bool {
        matched
            .class
            .as_deref()
            .is_some_and(|c| c.split_whitespace().any(|part| part == class))
    }
}

#[async_trait]
impl BrowserSession for FakePortal {
    async fn load(&self, url: &str) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        log.visited.push(url.to_string());
        let mut state = self.state.lock().unwrap();
        // A new navigation aborts a form submission still in flight.
        if state.pending_login.take().is_some() {
            log.cancelled_logins += 1;
        }
        state.url = url.to_string();
        state.view = if url.ends_with("/users/sign_in") {
            if self.script.splash {
                View::Splash
            } else if self.script.login_form {
                View::Login
            } else {
                View::Blank
            }
        } else if url.ends_with("/appointment") && state.logged_in {
            View::Appointment { calendar_open: false }
        } else {
            View::Blank
        };
        Ok(())
    }

    async fn find_elements(&self, locator: &Locator) -> Result<Vec<ElementHandle>> {
        let count = self.matches(locator)?.len();
        Ok((0..count).map(|i| ElementHandle::new(locator.clone(), i)).collect())
    }

    async fn is_clickable(&self, element: &ElementHandle) -> Result<bool> {
        self.resolve(element).map(|_| true)
    }

    async fn click(&self, element: &ElementHandle) -> Result<()> {
        let matched = self.resolve(element)?;
        let mut state = self.state.lock().unwrap();
        if state.view == View::Splash && matched.text.contains("Sign In") {
            state.view = if self.script.login_form { View::Login } else { View::Blank };
        } else if matched.name.as_deref() == Some("commit") {
            if self.script.login_latency == 0 {
                Self::land_login(&mut state);
            } else {
                state.pending_login = Some(self.script.login_latency);
            }
        }
        Ok(())
    }

    async fn force_click(&self, element: &ElementHandle) -> Result<()> {
        let matched = self.resolve(element)?;
        let mut state = self.state.lock().unwrap();
        if Self::has_class(&matched, "ui-datepicker-next") {
            if !self.next_disabled(state.month) && state.month + 1 < self.script.months.len() {
                state.month += 1;
            }
        } else if let View::Appointment { calendar_open } = &mut state.view {
            if matched.text.contains("calendar") {
                *calendar_open = true;
            }
        }
        Ok(())
    }

    async fn type_text(&self, element: &ElementHandle, text: &str) -> Result<()> {
        let matched = self.resolve(element)?;
        let field = matched.id.unwrap_or_default();
        self.log.lock().unwrap().typed.insert(field, text.to_string());
        Ok(())
    }

    async fn set_property(&self, element: &ElementHandle, name: &str, value: serde_json::Value) -> Result<()> {
        let matched = self.resolve(element)?;
        if matched.id.as_deref() == Some("policy_confirmed") && name == "checked" {
            self.log.lock().unwrap().consent_checked = value == serde_json::Value::Bool(true);
        }
        Ok(())
    }

    async fn read_text(&self, element: &ElementHandle) -> Result<String> {
        Ok(self.resolve(element)?.text)
    }

    async fn read_attribute(&self, element: &ElementHandle, name: &str) -> Result<Option<String>> {
        let matched = self.resolve(element)?;
        Ok(match name {
            "id" => matched.id,
            "name" => matched.name,
            "class" => matched.class,
            _ => None,
        })
    }

    async fn wait_for_navigation(&self) -> Result<()> {
        Ok(())
    }

    async fn current_url(&self) -> String {
        let mut state = self.state.lock().unwrap();
        match state.pending_login {
            Some(remaining) if remaining <= 1 => Self::land_login(&mut state),
            Some(remaining) => state.pending_login = Some(remaining - 1),
            None => {}
        }
        state.url.clone()
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.log.lock().unwrap().screenshots += 1;
        Ok(b"\x89PNG\r\n\x1a\nfake".to_vec())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.log.lock().unwrap().closed += 1;
        }
        Ok(())
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(5)
    }
}

/// Hands out a fresh `FakePortal` per cycle, or fails like a missing Chrome.
/// With several scripts, session N gets script N and the last one repeats.
pub struct FakeLauncher {
    scripts: Vec<PortalScript>,
    log: SharedLog,
    fail_launch: bool,
}

impl FakeLauncher {
    pub fn new(script: PortalScript) -> (Self, SharedLog) {
        Self::sequence(vec![script])
    }

    pub fn sequence(scripts: Vec<PortalScript>) -> (Self, SharedLog) {
        let log = SharedLog::default();
        let launcher = Self {
            scripts,
            log: Arc::clone(&log),
            fail_launch: false,
        };
        (launcher, log)
    }

    pub fn failing() -> (Self, SharedLog) {
        let (mut launcher, log) = Self::sequence(Vec::new());
        launcher.fail_launch = true;
        (launcher, log)
    }
}

#[async_trait]
impl SessionFactory for FakeLauncher {
    async fn open(&self) -> Result<Box<dyn BrowserSession>> {
        if self.fail_launch || self.scripts.is_empty() {
            return Err(AppError::browser("Failed to launch browser: no chrome binary"));
        }
        let script = {
            let mut log = self.log.lock().unwrap();
            let script = self.scripts[log.opened.min(self.scripts.len() - 1)].clone();
            log.opened += 1;
            script
        };
        Ok(Box::new(FakePortal::new(script, Arc::clone(&self.log))))
    }
}

pub fn credentials() -> Credentials {
    Credentials::new("me@example.com", "s3cret")
}

pub fn target() -> ScheduleTarget {
    ScheduleTarget::new(PROFILE_ID).unwrap()
}

pub fn navigator() -> SessionNavigator {
    SessionNavigator::new(PortalUrls::new(BASE_URL).unwrap(), ELEMENT_TIMEOUT)
}

pub fn extractor() -> CalendarExtractor {
    CalendarExtractor::new(Duration::ZERO)
}

pub fn orchestrator_with(launcher: FakeLauncher, notifier: MockTransport) -> ScanOrchestrator {
    ScanOrchestrator::new(
        Box::new(launcher),
        Box::new(notifier),
        RECIPIENT,
        credentials(),
        target(),
        navigator(),
        extractor(),
    )
}

/// Opens a session on `script` and signs in, leaving the calendar open.
pub async fn open_calendar(script: PortalScript) -> (Box<dyn BrowserSession>, SharedLog) {
    let (launcher, log) = FakeLauncher::new(script);
    let session = launcher.open().await.unwrap();
    navigator()
        .navigate(session.as_ref(), &credentials(), &target())
        .await
        .unwrap();
    (session, log)
}
