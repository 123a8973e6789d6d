use rand::Rng;
use reqwest::{
    header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER, USER_AGENT},
    Client, StatusCode,
};
use std::{sync::Arc, time::Duration};

use crate::alert::Alert;
use crate::browser::Browser;
use crate::config::WatcherConfig;
use crate::error::WatchError;
use crate::models::{EventSnapshot, GraphqlRequest};
use crate::stop::StopSignal;

const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    NoTickets,
    TicketsListed { listed: usize, available: usize },
    RateLimited { wait: Duration },
}

pub struct Poller {
    config: Arc<WatcherConfig>,
    client: Client,
    request: GraphqlRequest,
    alert: Box<dyn Alert>,
    browser: Box<dyn Browser>,
}

impl Poller {
    pub fn new(
        config: Arc<WatcherConfig>,
        client: Client,
        alert: Box<dyn Alert>,
        browser: Box<dyn Browser>,
    ) -> Self {
        let request = GraphqlRequest::registrations_for_sale(&config.event_id, config.limit);
        Self {
            config,
            client,
            request,
            alert,
            browser,
        }
    }

    /// Polls until a fatal error or until `stop` fires.
    pub async fn run(&self, stop: StopSignal) -> Result<(), WatchError> {
        loop {
            if stop.stopped() {
                break;
            }
            let outcome = tokio::select! {
                outcome = self.poll_once() => outcome?,
                _ = stop.wait() => break,
            };
            if stop.sleep_or_stop(self.delay_after(&outcome)).await {
                break;
            }
        }
        tracing::info!("polling stopped");
        Ok(())
    }

    pub fn delay_after(&self, outcome: &PollOutcome) -> Duration {
        match outcome {
            PollOutcome::RateLimited { wait } => *wait,
            PollOutcome::NoTickets | PollOutcome::TicketsListed { .. } => self.config.poll_interval,
        }
    }

    /// One request/inspect/alert cycle.
    pub async fn poll_once(&self) -> Result<PollOutcome, WatchError> {
        let response = self
            .client
            .post(&self.config.graphql_url)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, random_user_agent())
            .json(&self.request)
            .send()
            .await?;

        match response.status() {
            // Rate limited: the platform wants a captcha solved in the browser.
            StatusCode::TOO_MANY_REQUESTS => {
                let wait = rate_limit_wait(response.headers())
                    .unwrap_or(self.config.rate_limit_fallback);
                tracing::warn!(
                    wait_secs = wait.as_secs(),
                    "rate limited; waiting before the next poll"
                );
                tracing::warn!(
                    url = %self.config.event_page_url,
                    "enter the captcha to resume scanning; opening the event page"
                );
                self.alert.alert();
                self.browser.open(&self.config.event_page_url);
                Ok(PollOutcome::RateLimited { wait })
            }
            StatusCode::OK => {
                let body = response.text().await?;
                let snapshot = EventSnapshot::from_body(&body)?;
                Ok(self.inspect(&snapshot))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(WatchError::UnexpectedStatus {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }

    fn inspect(&self, snapshot: &EventSnapshot) -> PollOutcome {
        if snapshot.registrations.is_empty() {
            tracing::info!(
                total = snapshot.registrations_for_sale_count,
                "no tickets"
            );
            return PollOutcome::NoTickets;
        }

        tracing::info!(
            listed = snapshot.registrations.len(),
            total = snapshot.registrations_for_sale_count,
            filtered = snapshot.filtered_registrations_for_sale_count,
            "tickets listed, checking if they are free"
        );
        let mut available = 0;
        // Listings without a purchase URL still get a tab: the event page.
        for registration in snapshot.available() {
            available += 1;
            let url = registration
                .purchase_url()
                .unwrap_or(self.config.event_page_url.as_str());
            self.browser.open(url);
            self.alert.alert();
            tracing::warn!(
                registration = registration.id.as_deref().unwrap_or("-"),
                ticket = registration.title(),
                url,
                "!!! TICKET FOUND !!!"
            );
        }
        if available == 0 {
            tracing::info!("no free tickets found, resuming");
        }

        PollOutcome::TicketsListed {
            listed: snapshot.registrations.len(),
            available,
        }
    }
}

fn random_user_agent() -> String {
    rand::thread_rng().gen_range(0..=1_000_000u32).to_string()
}

/// Seconds to back off after a 429. The platform reports them in
/// `X-RateLimit-Remaining`; `Retry-After` is honoured when that is absent,
/// unparseable or zero.
fn rate_limit_wait(headers: &HeaderMap) -> Option<Duration> {
    // Remaining first: that is where the platform puts its wait today.
    [RATE_LIMIT_REMAINING, RETRY_AFTER.as_str()]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.trim().parse::<u64>().ok())
        // A zero here is spent quota, not a wait; it would spin the loop.
        .find(|secs| *secs > 0)
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };
    use std::time::Instant;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Clone, Default)]
    struct Recorder {
        alerts: Arc<AtomicUsize>,
        opened: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn alerts(&self) -> usize {
            self.alerts.load(Ordering::SeqCst)
        }

        fn opened(&self) -> Vec<String> {
            self.opened.lock().unwrap().clone()
        }
    }

    impl Alert for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn alert(&self) {
            self.alerts.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Browser for Recorder {
        fn open(&self, url: &str) {
            self.opened.lock().unwrap().push(url.to_string());
        }
    }

    const EVENT_PAGE: &str = "https://tickets.test/e/evt42/resale";

    fn poller_for(server: &MockServer, recorder: &Recorder) -> Poller {
        let config = WatcherConfig {
            event_id: "evt42".to_string(),
            graphql_url: format!("{}/api/graphql", server.uri()),
            event_page_url: EVENT_PAGE.to_string(),
            ..WatcherConfig::default()
        };
        Poller::new(
            Arc::new(config),
            Client::new(),
            Box::new(recorder.clone()),
            Box::new(recorder.clone()),
        )
    }

    fn event_body(registrations: Value) -> Value {
        let count = registrations.as_array().map(|list| list.len()).unwrap_or(0);
        json!({
            "data": {
                "event": {
                    "id": "evt42",
                    "registrations_for_sale_count": count,
                    "filtered_registrations_for_sale_count": count,
                    "sold_registrations_count": 12,
                    "registrations_for_sale": registrations
                }
            }
        })
    }

    async fn mount(server: &MockServer, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/api/graphql"))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn empty_listing_does_not_alert() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/graphql"))
            .and(header("content-type", "application/json"))
            .and(body_partial_json(json!({
                "operationName": "GetRegistrationsForSale",
                "variables": { "id": "evt42", "tickets": null, "limit": 100 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(event_body(json!([]))))
            .expect(1)
            .mount(&server)
            .await;
        let recorder = Recorder::default();
        let poller = poller_for(&server, &recorder);

        let outcome = poller.poll_once().await.unwrap();

        assert_eq!(outcome, PollOutcome::NoTickets);
        assert_eq!(recorder.alerts(), 0);
        assert!(recorder.opened().is_empty());
        assert_eq!(poller.delay_after(&outcome), Duration::from_secs(15));
    }

    #[tokio::test]
    async fn request_carries_numeric_user_agent() {
        let server = MockServer::start().await;
        mount(
            &server,
            ResponseTemplate::new(200).set_body_json(event_body(json!([]))),
        )
        .await;
        let recorder = Recorder::default();
        poller_for(&server, &recorder).poll_once().await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let agent = requests[0]
            .headers
            .get("user-agent")
            .and_then(|value| value.to_str().ok())
            .unwrap();
        let agent: u32 = agent.parse().unwrap();
        assert!(agent <= 1_000_000);
    }

    #[tokio::test]
    async fn available_ticket_alerts_once_and_opens_purchase_url() {
        let server = MockServer::start().await;
        mount(
            &server,
            ResponseTemplate::new(200).set_body_json(event_body(json!([
                {
                    "id": "reg-1",
                    "ticket": { "id": "t1", "title": "Marathon" },
                    "resale": { "id": "s1", "available": true, "total_amount": 4500, "public_url": "https://tickets.test/buy/1" }
                }
            ]))),
        )
        .await;
        let recorder = Recorder::default();
        let poller = poller_for(&server, &recorder);

        let outcome = poller.poll_once().await.unwrap();

        assert_eq!(
            outcome,
            PollOutcome::TicketsListed {
                listed: 1,
                available: 1
            }
        );
        assert_eq!(recorder.alerts(), 1);
        assert_eq!(recorder.opened(), vec!["https://tickets.test/buy/1".to_string()]);
    }

    #[tokio::test]
    async fn only_available_tickets_trigger_alerts() {
        let server = MockServer::start().await;
        mount(
            &server,
            ResponseTemplate::new(200).set_body_json(event_body(json!([
                { "id": "a", "ticket": { "available": true, "public_url": "https://tickets.test/buy/a" } },
                { "id": "b", "resale": { "available": false, "public_url": "https://tickets.test/buy/b" } },
                { "id": "c", "resale": { "available": true } }
            ]))),
        )
        .await;
        let recorder = Recorder::default();

        let outcome = poller_for(&server, &recorder).poll_once().await.unwrap();

        assert_eq!(
            outcome,
            PollOutcome::TicketsListed {
                listed: 3,
                available: 2
            }
        );
        assert_eq!(recorder.alerts(), 2);
        assert_eq!(
            recorder.opened(),
            vec!["https://tickets.test/buy/a".to_string(), EVENT_PAGE.to_string()]
        );
    }

    #[tokio::test]
    async fn rate_limit_alerts_opens_event_page_and_waits_for_hint() {
        let server = MockServer::start().await;
        mount(
            &server,
            ResponseTemplate::new(429).insert_header("X-RateLimit-Remaining", "37"),
        )
        .await;
        let recorder = Recorder::default();
        let poller = poller_for(&server, &recorder);

        let outcome = poller.poll_once().await.unwrap();

        assert_eq!(
            outcome,
            PollOutcome::RateLimited {
                wait: Duration::from_secs(37)
            }
        );
        assert_eq!(poller.delay_after(&outcome), Duration::from_secs(37));
        assert_eq!(recorder.alerts(), 1);
        assert_eq!(recorder.opened(), vec![EVENT_PAGE.to_string()]);
    }

    #[tokio::test]
    async fn rate_limit_without_hint_uses_fallback() {
        let server = MockServer::start().await;
        mount(&server, ResponseTemplate::new(429)).await;
        let recorder = Recorder::default();

        let outcome = poller_for(&server, &recorder).poll_once().await.unwrap();

        assert_eq!(
            outcome,
            PollOutcome::RateLimited {
                wait: Duration::from_secs(60)
            }
        );
    }

    #[test]
    fn retry_after_is_used_when_remaining_is_missing() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, "9".parse().unwrap());
        assert_eq!(rate_limit_wait(&headers), Some(Duration::from_secs(9)));

        headers.insert(RATE_LIMIT_REMAINING, "4".parse().unwrap());
        assert_eq!(rate_limit_wait(&headers), Some(Duration::from_secs(4)));

        let mut junk = HeaderMap::new();
        junk.insert(RATE_LIMIT_REMAINING, "soon".parse().unwrap());
        assert_eq!(rate_limit_wait(&junk), None);
    }

    #[test]
    fn zero_remaining_is_not_a_wait() {
        let mut headers = HeaderMap::new();
        headers.insert(RATE_LIMIT_REMAINING, "0".parse().unwrap());
        assert_eq!(rate_limit_wait(&headers), None);

        headers.insert(RETRY_AFTER, "30".parse().unwrap());
        assert_eq!(rate_limit_wait(&headers), Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn zero_remaining_backs_off_with_retry_after() {
        let server = MockServer::start().await;
        mount(
            &server,
            ResponseTemplate::new(429)
                .insert_header("X-RateLimit-Remaining", "0")
                .insert_header("Retry-After", "30"),
        )
        .await;
        let recorder = Recorder::default();
        let poller = poller_for(&server, &recorder);

        let outcome = poller.poll_once().await.unwrap();

        assert_eq!(
            outcome,
            PollOutcome::RateLimited {
                wait: Duration::from_secs(30)
            }
        );
        assert_eq!(poller.delay_after(&outcome), Duration::from_secs(30));
        assert_eq!(recorder.alerts(), 1);
        assert_eq!(recorder.opened().len(), 1);
    }

    #[tokio::test]
    async fn zero_remaining_alone_uses_fallback() {
        let server = MockServer::start().await;
        mount(
            &server,
            ResponseTemplate::new(429).insert_header("X-RateLimit-Remaining", "0"),
        )
        .await;
        let recorder = Recorder::default();

        let outcome = poller_for(&server, &recorder).poll_once().await.unwrap();

        assert_eq!(
            outcome,
            PollOutcome::RateLimited {
                wait: Duration::from_secs(60)
            }
        );
    }

    #[tokio::test]
    async fn unexpected_status_is_fatal() {
        let server = MockServer::start().await;
        mount(
            &server,
            ResponseTemplate::new(503).set_body_string("upstream down"),
        )
        .await;
        let recorder = Recorder::default();

        let err = poller_for(&server, &recorder).poll_once().await.unwrap_err();

        match err {
            WatchError::UnexpectedStatus { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "upstream down");
            }
            other => panic!("expected unexpected status, got {other:?}"),
        }
        assert_eq!(recorder.alerts(), 0);
    }

    #[tokio::test]
    async fn non_integer_count_fails_before_alerting() {
        let server = MockServer::start().await;
        mount(
            &server,
            ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "event": {
                        "registrations_for_sale_count": "1",
                        "filtered_registrations_for_sale_count": 1,
                        "registrations_for_sale": [
                            { "id": "a", "resale": { "available": true, "public_url": "https://tickets.test/buy/a" } }
                        ]
                    }
                }
            })),
        )
        .await;
        let recorder = Recorder::default();

        let err = poller_for(&server, &recorder).poll_once().await.unwrap_err();

        assert!(matches!(err, WatchError::MalformedResponse(_)));
        assert_eq!(recorder.alerts(), 0);
        assert!(recorder.opened().is_empty());
    }

    #[tokio::test]
    async fn run_backs_off_then_stops_on_fatal_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/graphql"))
            .respond_with(ResponseTemplate::new(429).insert_header("X-RateLimit-Remaining", "1"))
            .up_to_n_times(1)
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/graphql"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;
        let recorder = Recorder::default();
        let poller = poller_for(&server, &recorder);

        let started = Instant::now();
        let result = poller.run(StopSignal::new()).await;

        assert!(matches!(
            result,
            Err(WatchError::UnexpectedStatus { status: 500, .. })
        ));
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(recorder.alerts(), 1);
        assert_eq!(recorder.opened(), vec![EVENT_PAGE.to_string()]);
    }

    #[tokio::test]
    async fn run_exits_cleanly_when_stopped() {
        let server = MockServer::start().await;
        mount(
            &server,
            ResponseTemplate::new(200).set_body_json(event_body(json!([]))),
        )
        .await;
        let recorder = Recorder::default();
        let poller = poller_for(&server, &recorder);
        let stop = StopSignal::new();
        let trigger = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.stop();
        });

        poller.run(stop).await.unwrap();

        assert_eq!(server.received_requests().await.unwrap().len(), 1);
        assert_eq!(recorder.alerts(), 0);
    }
}
