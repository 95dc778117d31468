//! Maps user-facing objective and call-to-action strings onto the fixed
//! enumerations the ads platform accepts. Both mappings are total: anything
//! unrecognised resolves to a documented default.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlatformObjective {
    OutcomeAwareness,
    OutcomeTraffic,
    OutcomeEngagement,
    OutcomeLeads,
    OutcomeAppPromotion,
    OutcomeSales,
}

impl PlatformObjective {
    pub const ALL: [PlatformObjective; 6] = [
        Self::OutcomeAwareness,
        Self::OutcomeTraffic,
        Self::OutcomeEngagement,
        Self::OutcomeLeads,
        Self::OutcomeAppPromotion,
        Self::OutcomeSales,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OutcomeAwareness => "OUTCOME_AWARENESS",
            Self::OutcomeTraffic => "OUTCOME_TRAFFIC",
            Self::OutcomeEngagement => "OUTCOME_ENGAGEMENT",
            Self::OutcomeLeads => "OUTCOME_LEADS",
            Self::OutcomeAppPromotion => "OUTCOME_APP_PROMOTION",
            Self::OutcomeSales => "OUTCOME_SALES",
        }
    }

    pub fn from_platform(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|candidate| candidate.as_str() == raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlatformCta {
    LearnMore,
    ShopNow,
    SignUp,
    Subscribe,
    ContactUs,
    Download,
    InstallMobileApp,
    BookTravel,
    ApplyNow,
    GetQuote,
    GetOffer,
    OrderNow,
    WatchMore,
    GetDirections,
}

impl PlatformCta {
    pub const ALL: [PlatformCta; 14] = [
        Self::LearnMore,
        Self::ShopNow,
        Self::SignUp,
        Self::Subscribe,
        Self::ContactUs,
        Self::Download,
        Self::InstallMobileApp,
        Self::BookTravel,
        Self::ApplyNow,
        Self::GetQuote,
        Self::GetOffer,
        Self::OrderNow,
        Self::WatchMore,
        Self::GetDirections,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LearnMore => "LEARN_MORE",
            Self::ShopNow => "SHOP_NOW",
            Self::SignUp => "SIGN_UP",
            Self::Subscribe => "SUBSCRIBE",
            Self::ContactUs => "CONTACT_US",
            Self::Download => "DOWNLOAD",
            Self::InstallMobileApp => "INSTALL_MOBILE_APP",
            Self::BookTravel => "BOOK_TRAVEL",
            Self::ApplyNow => "APPLY_NOW",
            Self::GetQuote => "GET_QUOTE",
            Self::GetOffer => "GET_OFFER",
            Self::OrderNow => "ORDER_NOW",
            Self::WatchMore => "WATCH_MORE",
            Self::GetDirections => "GET_DIRECTIONS",
        }
    }

    pub fn from_platform(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|candidate| candidate.as_str() == raw)
    }
}

pub const DEFAULT_OBJECTIVE: PlatformObjective = PlatformObjective::OutcomeTraffic;
pub const DEFAULT_CTA: PlatformCta = PlatformCta::LearnMore;
pub const DEFAULT_OPTIMIZATION_GOAL: &str = "LINK_CLICKS";

/// Pre-outcome objective names still sent by older clients.
pub const LEGACY_OBJECTIVES: &[(&str, PlatformObjective)] = &[
    ("LINK_CLICKS", PlatformObjective::OutcomeTraffic),
    ("TRAFFIC", PlatformObjective::OutcomeTraffic),
    ("REACH", PlatformObjective::OutcomeAwareness),
    ("BRAND_AWARENESS", PlatformObjective::OutcomeAwareness),
    ("AWARENESS", PlatformObjective::OutcomeAwareness),
    ("STORE_VISITS", PlatformObjective::OutcomeAwareness),
    ("POST_ENGAGEMENT", PlatformObjective::OutcomeEngagement),
    ("PAGE_LIKES", PlatformObjective::OutcomeEngagement),
    ("EVENT_RESPONSES", PlatformObjective::OutcomeEngagement),
    ("VIDEO_VIEWS", PlatformObjective::OutcomeEngagement),
    ("MESSAGES", PlatformObjective::OutcomeEngagement),
    ("ENGAGEMENT", PlatformObjective::OutcomeEngagement),
    ("LEAD_GENERATION", PlatformObjective::OutcomeLeads),
    ("LEADS", PlatformObjective::OutcomeLeads),
    ("APP_INSTALLS", PlatformObjective::OutcomeAppPromotion),
    ("APP_PROMOTION", PlatformObjective::OutcomeAppPromotion),
    ("CONVERSIONS", PlatformObjective::OutcomeSales),
    ("PRODUCT_CATALOG_SALES", PlatformObjective::OutcomeSales),
    ("SALES", PlatformObjective::OutcomeSales),
];

pub const OPTIMIZATION_GOALS: &[(PlatformObjective, &str)] = &[
    (PlatformObjective::OutcomeAwareness, "REACH"),
    (PlatformObjective::OutcomeTraffic, "LINK_CLICKS"),
    (PlatformObjective::OutcomeEngagement, "POST_ENGAGEMENT"),
    (PlatformObjective::OutcomeLeads, "LEAD_GENERATION"),
    (PlatformObjective::OutcomeAppPromotion, "APP_INSTALLS"),
    (PlatformObjective::OutcomeSales, "OFFSITE_CONVERSIONS"),
];

/// Substring aliases, checked in order after direct membership. Earlier rows win.
pub const CTA_ALIASES: &[(&str, PlatformCta)] = &[
    ("shop now", PlatformCta::ShopNow),
    ("buy", PlatformCta::ShopNow),
    ("purchase", PlatformCta::ShopNow),
    ("shop", PlatformCta::ShopNow),
    ("order", PlatformCta::OrderNow),
    ("sign up", PlatformCta::SignUp),
    ("signup", PlatformCta::SignUp),
    ("register", PlatformCta::SignUp),
    ("join", PlatformCta::SignUp),
    ("subscribe", PlatformCta::Subscribe),
    ("contact", PlatformCta::ContactUs),
    ("call us", PlatformCta::ContactUs),
    ("message us", PlatformCta::ContactUs),
    ("install", PlatformCta::InstallMobileApp),
    ("get app", PlatformCta::InstallMobileApp),
    ("download", PlatformCta::Download),
    ("book", PlatformCta::BookTravel),
    ("reserve", PlatformCta::BookTravel),
    ("apply", PlatformCta::ApplyNow),
    ("quote", PlatformCta::GetQuote),
    ("estimate", PlatformCta::GetQuote),
    ("offer", PlatformCta::GetOffer),
    ("deal", PlatformCta::GetOffer),
    ("discount", PlatformCta::GetOffer),
    ("claim", PlatformCta::GetOffer),
    ("watch", PlatformCta::WatchMore),
    ("video", PlatformCta::WatchMore),
    ("directions", PlatformCta::GetDirections),
    ("visit", PlatformCta::GetDirections),
    ("learn", PlatformCta::LearnMore),
    ("more info", PlatformCta::LearnMore),
    ("get started", PlatformCta::LearnMore),
    ("discover", PlatformCta::LearnMore),
    ("explore", PlatformCta::LearnMore),
    ("start", PlatformCta::LearnMore),
];

// Reverse containment (alias contains input) needs a floor, otherwise "e" matches everything.
const MIN_REVERSE_MATCH_CHARS: usize = 3;

pub fn map_objective(input: Option<&str>) -> PlatformObjective {
    let Some(raw) = input else {
        tracing::debug!(rule = "default", "objective missing, using default");
        return DEFAULT_OBJECTIVE;
    };
    let key = enum_key(raw);

    if let Some(objective) = PlatformObjective::from_platform(&key) {
        tracing::debug!(rule = "pass-through", objective = objective.as_str(), "objective mapped");
        return objective;
    }

    if let Some((alias, objective)) = LEGACY_OBJECTIVES.iter().find(|(alias, _)| *alias == key) {
        tracing::debug!(rule = "legacy-alias", alias, objective = objective.as_str(), "objective mapped");
        return *objective;
    }

    tracing::debug!(rule = "default", input = raw, "unrecognised objective, using default");
    DEFAULT_OBJECTIVE
}

pub fn optimization_goal(objective: PlatformObjective) -> &'static str {
    OPTIMIZATION_GOALS
        .iter()
        .find(|(candidate, _)| *candidate == objective)
        .map(|(_, goal)| *goal)
        .unwrap_or(DEFAULT_OPTIMIZATION_GOAL)
}

pub fn map_call_to_action(input: &str) -> PlatformCta {
    let key = enum_key(input);
    if let Some(cta) = PlatformCta::from_platform(&key) {
        tracing::debug!(rule = "direct", cta = cta.as_str(), "call to action mapped");
        return cta;
    }

    let phrase = phrase_key(input);
    if !phrase.is_empty() {
        let allow_reverse = phrase.chars().count() >= MIN_REVERSE_MATCH_CHARS;
        let hit = CTA_ALIASES.iter().find(|(alias, _)| {
            phrase.contains(alias) || (allow_reverse && alias.contains(phrase.as_str()))
        });
        if let Some((alias, cta)) = hit {
            tracing::debug!(rule = "alias", alias, cta = cta.as_str(), "call to action mapped");
            return *cta;
        }
    }

    tracing::debug!(rule = "default", input, "unrecognised call to action, using default");
    DEFAULT_CTA
}

/// `"learn-more "` -> `"LEARN_MORE"`.
fn enum_key(raw: &str) -> String {
    raw.split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|part| !part.is_empty())
        .map(|part| part.to_ascii_uppercase())
        .collect::<Vec<_>>()
        .join("_")
}

/// `"Shop_Now!"` -> `"shop now!"`.
fn phrase_key(raw: &str) -> String {
    raw.split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|part| !part.is_empty())
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}
