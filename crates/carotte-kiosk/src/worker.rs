//! Card worker: one thread per physical reader
//!
//! The worker owns the reader's [`Terminal`], so requests against the card
//! run strictly one at a time. Between requests it polls for the card and
//! reports insertions and removals as [`KioskEvent`]s.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use carotte_card::{CardError, Connector, Terminal, TransportError};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::config::VendingConfig;
use crate::coordinator::{
    BonusTransferOutcome, CardBalance, Coordinator, InitialBalanceOutcome, PurchaseOutcome,
    Reconciled, TopUpOutcome,
};
use crate::error::KioskError;

/// Messages sent from the card worker to the front end
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KioskEvent {
    /// Card was detected
    CardDetected { reader_name: String },
    /// Card was removed
    CardRemoved,
    /// Reader is unavailable
    ReaderUnavailable { error: String },
}

type Reply<T> = Sender<Result<T, KioskError>>;

enum Job {
    Balance {
        pin: String,
        reply: Reply<CardBalance>,
    },
    TopUp {
        pin: String,
        amount: Decimal,
        reply: Reply<Reconciled<TopUpOutcome>>,
    },
    Purchase {
        pin: String,
        product_id: String,
        reply: Reply<Reconciled<PurchaseOutcome>>,
    },
    TransferBonus {
        pin: String,
        reply: Reply<Reconciled<BonusTransferOutcome>>,
    },
    InitialBalance {
        pin: String,
        amount_cents: u16,
        reply: Reply<Reconciled<InitialBalanceOutcome>>,
    },
    Stop,
}

/// Front-end side of a card worker. Each call blocks until the worker
/// has run the request.
#[derive(Clone)]
pub struct KioskHandle {
    jobs: Sender<Job>,
}

impl KioskHandle {
    pub fn balance(&self, pin: &str) -> Result<CardBalance, KioskError> {
        self.request(|reply| Job::Balance {
            pin: pin.to_string(),
            reply,
        })
    }

    pub fn top_up(&self, pin: &str, amount: Decimal) -> Result<Reconciled<TopUpOutcome>, KioskError> {
        self.request(|reply| Job::TopUp {
            pin: pin.to_string(),
            amount,
            reply,
        })
    }

    pub fn purchase(
        &self,
        pin: &str,
        product_id: &str,
    ) -> Result<Reconciled<PurchaseOutcome>, KioskError> {
        self.request(|reply| Job::Purchase {
            pin: pin.to_string(),
            product_id: product_id.to_string(),
            reply,
        })
    }

    pub fn transfer_bonus(&self, pin: &str) -> Result<Reconciled<BonusTransferOutcome>, KioskError> {
        self.request(|reply| Job::TransferBonus {
            pin: pin.to_string(),
            reply,
        })
    }

    pub fn initial_balance(
        &self,
        pin: &str,
        amount_cents: u16,
    ) -> Result<Reconciled<InitialBalanceOutcome>, KioskError> {
        self.request(|reply| Job::InitialBalance {
            pin: pin.to_string(),
            amount_cents,
            reply,
        })
    }

    /// Ask the worker to exit after the request in progress.
    pub fn stop(&self) {
        let _ = self.jobs.send(Job::Stop);
    }

    fn request<T>(&self, job: impl FnOnce(Reply<T>) -> Job) -> Result<T, KioskError> {
        let (reply, response) = mpsc::channel();
        self.jobs
            .send(job(reply))
            .map_err(|_| KioskError::WorkerStopped)?;
        response.recv().map_err(|_| KioskError::WorkerStopped)?
    }
}

/// Background worker for one reader
pub struct CardWorker<C: Connector> {
    terminal: Terminal<C>,
    coordinator: Coordinator,
    vending: VendingConfig,
    poll_interval: Duration,
    event_tx: Sender<KioskEvent>,
    card_present: bool,
    reader_error: Option<String>,
}

impl<C> CardWorker<C>
where
    C: Connector + Send + 'static,
    C::Link: Send + 'static,
{
    /// Spawn a new card worker thread
    pub fn spawn(
        terminal: Terminal<C>,
        coordinator: Coordinator,
        vending: VendingConfig,
        poll_interval: Duration,
    ) -> (KioskHandle, Receiver<KioskEvent>) {
        let (event_tx, event_rx) = mpsc::channel();
        let (jobs, job_rx) = mpsc::channel();

        thread::spawn(move || {
            let worker = CardWorker {
                terminal,
                coordinator,
                vending,
                poll_interval,
                event_tx,
                card_present: false,
                reader_error: None,
            };
            worker.run(job_rx);
        });

        (KioskHandle { jobs }, event_rx)
    }

    fn run(mut self, jobs: Receiver<Job>) {
        info!(terminal = %self.coordinator.terminal(), "Card worker thread started");

        loop {
            match jobs.recv_timeout(self.poll_interval) {
                Ok(Job::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(job) => self.execute(job),
                Err(RecvTimeoutError::Timeout) => self.poll(),
            }
        }

        self.terminal.release();
        info!("Card worker thread stopped");
    }

    fn poll(&mut self) {
        match self.terminal.acquire() {
            Ok(card) => {
                let reader_name = card.session().reader_name().to_string();
                self.reader_error = None;
                if !self.card_present {
                    info!(reader = %reader_name, "Card detected");
                    self.card_present = true;
                    self.emit(KioskEvent::CardDetected { reader_name });
                }
            }
            Err(TransportError::NoCard | TransportError::Disconnected) => {
                self.reader_error = None;
                self.card_removed();
            }
            Err(e) => {
                self.card_removed();
                let error = e.to_string();
                if self.reader_error.as_deref() != Some(error.as_str()) {
                    debug!(error = %error, "Card reader unavailable");
                    self.reader_error = Some(error.clone());
                    self.emit(KioskEvent::ReaderUnavailable { error });
                }
            }
        }
    }

    fn card_removed(&mut self) {
        if self.card_present {
            info!("Card removed");
            self.card_present = false;
            self.emit(KioskEvent::CardRemoved);
        }
    }

    fn emit(&self, event: KioskEvent) {
        let _ = self.event_tx.send(event);
    }

    fn execute(&mut self, job: Job) {
        match job {
            Job::Balance { pin, reply } => {
                let result = self.with_card(|coordinator, _, card| coordinator.balance(card, &pin));
                let _ = reply.send(result);
            }
            Job::TopUp { pin, amount, reply } => {
                let result =
                    self.with_card(|coordinator, _, card| coordinator.top_up(card, &pin, amount));
                let _ = reply.send(result);
            }
            Job::Purchase {
                pin,
                product_id,
                reply,
            } => {
                let result = self.with_card(|coordinator, vending, card| {
                    let product = vending
                        .product(&product_id)
                        .ok_or_else(|| KioskError::UnknownProduct(product_id.clone()))?;
                    coordinator.purchase(card, &pin, product)
                });
                let _ = reply.send(result);
            }
            Job::TransferBonus { pin, reply } => {
                let result =
                    self.with_card(|coordinator, _, card| coordinator.transfer_bonus(card, &pin));
                let _ = reply.send(result);
            }
            Job::InitialBalance {
                pin,
                amount_cents,
                reply,
            } => {
                let result = self.with_card(|coordinator, _, card| {
                    coordinator.initial_balance(card, &pin, amount_cents)
                });
                let _ = reply.send(result);
            }
            Job::Stop => {}
        }
    }

    /// Run `f` against the current card. A transport failure drops the
    /// session so the next request reconnects.
    fn with_card<T>(
        &mut self,
        f: impl FnOnce(
            &Coordinator,
            &VendingConfig,
            &mut carotte_card::StudentCard<C::Link>,
        ) -> Result<T, KioskError>,
    ) -> Result<T, KioskError> {
        let card = self
            .terminal
            .acquire()
            .map_err(|e| KioskError::Card(CardError::from(e)))?;
        let result = f(&self.coordinator, &self.vending, card);

        if let Err(KioskError::Card(CardError::Transport(e))) = &result {
            warn!(error = %e, "Card lost during request");
            self.terminal.release();
        }
        result
    }
}
