//! Authenticated walk from the sign-in page to an open appointment calendar.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

use crate::models::{Credentials, ScheduleTarget};
use crate::scraper::{BrowserSession, ElementHandle, Locator};
use crate::utils::error::{AppError, Result};

pub mod selectors {
    pub const EMAIL_FIELD: &str = "#user_email";
    pub const PASSWORD_FIELD: &str = "#user_password";
    pub const CONSENT_CHECKBOX: &str = "#policy_confirmed";
    pub const SUBMIT_BUTTON: &str = "[name='commit']";
    pub const SPLASH_LINK_TEXT: &str = "Sign In";
    pub const DATE_INPUT: &str = "#appointments_consulate_appointment_date";
    pub const CALENDAR_TRIGGER: &str = "#appointments_consulate_appointment_date_input a";
    pub const CALENDAR_WIDGET: &str = ".ui-datepicker-calendar";
}

/// Which variant of the sign-in page the portal served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageShape {
    /// The login form is rendered immediately.
    LoginForm,
    /// A landing screen must be dismissed via its "Sign In" link first.
    Splash,
}

/// Portal URLs derived from the configured base.
#[derive(Debug, Clone)]
pub struct PortalUrls {
    base: Url,
}

impl PortalUrls {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| AppError::Validation(format!("invalid portal base URL '{}': {}", base_url, e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { base })
    }

    pub fn sign_in(&self) -> Result<Url> {
        self.join("users/sign_in")
    }

    pub fn appointment(&self, target: &ScheduleTarget) -> Result<Url> {
        self.join(&format!("schedule/{}/appointment", target.as_str()))
    }

    fn join(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| AppError::Validation(format!("cannot build portal URL '{}': {}", path, e)))
    }
}

pub struct SessionNavigator {
    urls: PortalUrls,
    element_timeout: Duration,
}

impl SessionNavigator {
    pub fn new(urls: PortalUrls, element_timeout: Duration) -> Self {
        Self { urls, element_timeout }
    }

    /// Signs in and leaves `session` on the appointment page with the
    /// calendar pop-up open.
    pub async fn navigate(
        &self,
        session: &dyn BrowserSession,
        credentials: &Credentials,
        target: &ScheduleTarget,
    ) -> Result<()> {
        self.sign_in(session, credentials).await?;
        self.open_calendar(session, target).await
    }

    pub async fn sign_in(&self, session: &dyn BrowserSession, credentials: &Credentials) -> Result<()> {
        let sign_in_url = self.urls.sign_in()?;
        tracing::info!(url = %sign_in_url, "opening sign-in page");
        session.load(sign_in_url.as_str()).await?;

        let email = match self.detect_page_shape(session).await? {
            (PageShape::LoginForm, Some(email)) => email,
            (shape, _) => {
                tracing::info!(?shape, "login form not shown yet, activating splash link");
                self.dismiss_splash(session).await?;
                self.require_auth(session, "email field", selectors::EMAIL_FIELD).await?
            }
        };

        tracing::debug!("filling credentials");
        session.type_text(&email, &credentials.identity).await?;
        let password = self
            .require_auth(session, "password field", selectors::PASSWORD_FIELD)
            .await?;
        session.type_text(&password, &credentials.secret).await?;

        match self.accept_consent(session).await {
            Ok(()) => tracing::debug!("consent checkbox set"),
            Err(err @ AppError::ConsentElementMissing { .. }) => {
                tracing::warn!(error = %err, "consent checkbox not found, assuming already accepted");
            }
            Err(err) => return Err(err),
        }

        let submit = self
            .require_auth(session, "submit button", selectors::SUBMIT_BUTTON)
            .await?;
        session.click(&submit).await?;
        self.await_sign_in_exit(session, &sign_in_url).await?;
        session.wait_for_navigation().await?;
        let landed = session.current_url().await;
        tracing::debug!(url = %landed, "login submitted");

        Ok(())
    }

    /// The driver does not see a form POST as a navigation until the next
    /// document commits, so the sign-in page is watched until it goes away.
    /// Loading another URL before then would abort the login.
    async fn await_sign_in_exit(&self, session: &dyn BrowserSession, sign_in_url: &Url) -> Result<()> {
        let email = Locator::css(selectors::EMAIL_FIELD);
        let deadline = Instant::now() + self.element_timeout;
        loop {
            let current = session.current_url().await;
            if !is_same_page(&current, sign_in_url) || session.find_element(&email).await?.is_none() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AppError::navigation_timeout("post-login page", sign_in_url.path()));
            }
            tokio::time::sleep(session.poll_interval()).await;
        }
    }

    /// Bounded probe for the email field. The handle is returned when the
    /// form is already on screen.
    pub async fn detect_page_shape(
        &self,
        session: &dyn BrowserSession,
    ) -> Result<(PageShape, Option<ElementHandle>)> {
        let email = session
            .wait_until_present(&Locator::css(selectors::EMAIL_FIELD), self.element_timeout)
            .await?;
        let shape = if email.is_some() {
            PageShape::LoginForm
        } else {
            PageShape::Splash
        };
        Ok((shape, email))
    }

    async fn dismiss_splash(&self, session: &dyn BrowserSession) -> Result<()> {
        let locator = Locator::link_text(selectors::SPLASH_LINK_TEXT);
        let link = session
            .wait_until_clickable(&locator, self.element_timeout)
            .await?
            .ok_or_else(|| AppError::auth_missing("sign-in splash link", &locator))?;
        session.click(&link).await?;
        Ok(())
    }

    /// The checkbox sits under an overlay, so its state is set directly.
    async fn accept_consent(&self, session: &dyn BrowserSession) -> Result<()> {
        let checkbox = session
            .wait_until_present(&Locator::css(selectors::CONSENT_CHECKBOX), self.element_timeout)
            .await?
            .ok_or_else(|| AppError::ConsentElementMissing {
                selector: selectors::CONSENT_CHECKBOX.to_string(),
            })?;
        session
            .set_property(&checkbox, "checked", serde_json::Value::Bool(true))
            .await
    }

    pub async fn open_calendar(&self, session: &dyn BrowserSession, target: &ScheduleTarget) -> Result<()> {
        let appointment_url = self.urls.appointment(target)?;
        tracing::info!(url = %appointment_url, "navigating to appointment page");
        session.load(appointment_url.as_str()).await?;
        let landed = session.current_url().await;
        tracing::debug!(url = %landed, "appointment page loaded");

        self.require_page(session, "appointment date input", selectors::DATE_INPUT)
            .await?;
        let trigger = self
            .require_page(session, "calendar trigger", selectors::CALENDAR_TRIGGER)
            .await?;
        session.force_click(&trigger).await?;
        self.require_page(session, "calendar widget", selectors::CALENDAR_WIDGET)
            .await?;
        tracing::debug!("calendar rendered");

        Ok(())
    }

    async fn require_auth(&self, session: &dyn BrowserSession, element: &str, selector: &str) -> Result<ElementHandle> {
        session
            .wait_until_present(&Locator::css(selector), self.element_timeout)
            .await?
            .ok_or_else(|| AppError::auth_missing(element, selector))
    }

    async fn require_page(&self, session: &dyn BrowserSession, element: &str, selector: &str) -> Result<ElementHandle> {
        session
            .wait_until_present(&Locator::css(selector), self.element_timeout)
            .await?
            .ok_or_else(|| AppError::navigation_timeout(element, selector))
    }
}

/// Same scheme, host and path; query and fragment are ignored.
fn is_same_page(current: &str, page: &Url) -> bool {
    Url::parse(current).is_ok_and(|url| {
        url.scheme() == page.scheme() && url.host_str() == page.host_str() && url.path() == page.path()
    })
}
