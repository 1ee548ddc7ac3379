use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use tokio::sync::{RwLock, oneshot};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::ADMISSIONS_TOTAL;

use super::conflict::{check_no_overlap, today, validate_date, validate_stay};
use super::{Engine, EngineError, WalCommand, apply_to_cabin, apply_to_guest};

impl Engine {
    pub async fn create_cabin(&self, id: Ulid, name: String, capacity: u32) -> Result<(), EngineError> {
        if capacity == 0 {
            return Err(EngineError::InvalidCapacity);
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("cabin name too long"));
        }
        let _gate = self.commit_gate.read().await;
        let _create = self.cabin_create.lock().await;
        if self.cabins.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.cabins.len() >= MAX_CABINS {
            return Err(EngineError::LimitExceeded("too many cabins"));
        }

        let event = Event::CabinCreated {
            id,
            name: name.clone(),
            capacity,
        };
        self.wal_append(&event).await?;
        self.cabins
            .insert(id, Arc::new(RwLock::new(CabinState::new(id, name, capacity))));
        debug!(%id, capacity, "cabin created");
        Ok(())
    }

    pub async fn create_guest(
        &self,
        id: Ulid,
        name: String,
        document: String,
        phone: Option<String>,
    ) -> Result<(), EngineError> {
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("guest name too long"));
        }
        if document.len() > MAX_DOCUMENT_LEN {
            return Err(EngineError::LimitExceeded("document too long"));
        }
        if let Some(ref p) = phone
            && p.len() > MAX_PHONE_LEN
        {
            return Err(EngineError::LimitExceeded("phone too long"));
        }
        let _gate = self.commit_gate.read().await;
        let _create = self.guest_create.lock().await;
        if self.guests.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.guests.len() >= MAX_GUESTS {
            return Err(EngineError::LimitExceeded("too many guests"));
        }

        let event = Event::GuestCreated {
            id,
            name: name.clone(),
            document: document.clone(),
            phone: phone.clone(),
        };
        self.wal_append(&event).await?;
        self.guests.insert(
            id,
            Arc::new(RwLock::new(GuestState::new(id, name, document, phone))),
        );
        debug!(%id, "guest created");
        Ok(())
    }

    pub async fn delete_cabin(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        let cs = self.get_cabin(&id).ok_or(EngineError::NotFound(id))?;
        let guard = cs.write().await;
        if !self.cabins.get(&id).is_some_and(|e| Arc::ptr_eq(e.value(), &cs)) {
            return Err(EngineError::NotFound(id));
        }
        if !guard.reservations.is_empty() {
            return Err(EngineError::HasActiveReservations(id));
        }

        self.wal_append(&Event::CabinDeleted { id }).await?;
        // Removed while the lock is held so a waiting admission sees it gone.
        self.cabins.remove(&id);
        drop(guard);
        info!(%id, "cabin deleted");
        Ok(())
    }

    pub async fn delete_guest(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        let gs = self.get_guest(&id).ok_or(EngineError::NotFound(id))?;
        let guard = gs.write().await;
        if !self.guests.get(&id).is_some_and(|e| Arc::ptr_eq(e.value(), &gs)) {
            return Err(EngineError::NotFound(id));
        }
        if !guard.reservations.is_empty() {
            return Err(EngineError::HasActiveReservations(id));
        }

        self.wal_append(&Event::GuestDeleted { id }).await?;
        self.guests.remove(&id);
        drop(guard);
        info!(%id, "guest deleted");
        Ok(())
    }

    /// Admit a reservation under a fresh id.
    pub async fn try_reserve(
        &self,
        guest_id: Ulid,
        cabin_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<Ulid, EngineError> {
        let id = Ulid::new();
        self.admit_reservation(id, guest_id, cabin_id, check_in, check_out)
            .await?;
        Ok(id)
    }

    /// Validate a stay against the cabin's reservations and commit it.
    ///
    /// The overlap scan, the WAL append and the in-memory insert all happen
    /// under the cabin's write lock; nothing is written on rejection.
    pub async fn admit_reservation(
        &self,
        id: Ulid,
        guest_id: Ulid,
        cabin_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<(), EngineError> {
        let result = self
            .admit_locked(id, guest_id, cabin_id, check_in, check_out)
            .await;
        let outcome = match &result {
            Ok(()) => "admitted",
            Err(e) => e.reason(),
        };
        metrics::counter!(ADMISSIONS_TOTAL, "outcome" => outcome).increment(1);
        match &result {
            Ok(()) => debug!(%id, %cabin_id, %guest_id, %check_in, %check_out, "reservation admitted"),
            Err(e) => debug!(%cabin_id, %guest_id, %check_in, %check_out, "reservation rejected: {e}"),
        }
        result
    }

    async fn admit_locked(
        &self,
        id: Ulid,
        guest_id: Ulid,
        cabin_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<(), EngineError> {
        let stay = validate_stay(check_in, check_out)?;
        let cs = self.get_cabin(&cabin_id).ok_or(EngineError::NotFound(cabin_id))?;
        let gs = self.get_guest(&guest_id).ok_or(EngineError::NotFound(guest_id))?;

        let _gate = self.commit_gate.read().await;
        let mut cabin = cs.write().await;
        if !self.cabins.get(&cabin_id).is_some_and(|e| Arc::ptr_eq(e.value(), &cs)) {
            return Err(EngineError::NotFound(cabin_id));
        }
        let mut guest = gs.write().await;
        if !self.guests.get(&guest_id).is_some_and(|e| Arc::ptr_eq(e.value(), &gs)) {
            return Err(EngineError::NotFound(guest_id));
        }

        if self.reservation_to_cabin.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if cabin.reservations.len() >= MAX_RESERVATIONS_PER_CABIN {
            return Err(EngineError::LimitExceeded("too many reservations on cabin"));
        }
        check_no_overlap(&cabin, &stay)?;

        // Claim the id across all cabins before logging. Lookups that find
        // the claim wait on this cabin's lock and then see the outcome.
        match self.reservation_to_cabin.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(cabin_id);
            }
        }

        let event = Event::ReservationAdmitted {
            id,
            guest_id,
            cabin_id,
            stay,
        };
        if let Err(e) = self.wal_append(&event).await {
            self.reservation_to_cabin.remove(&id);
            return Err(e);
        }
        apply_to_cabin(&mut cabin, &event);
        apply_to_guest(&mut guest, &event);
        self.apply_to_indexes(&event);
        Ok(())
    }

    /// Delete a reservation together with its payments.
    /// Returns how many payments went with it.
    pub async fn delete_reservation(&self, id: Ulid) -> Result<usize, EngineError> {
        let _gate = self.commit_gate.read().await;
        let mut cabin = self.resolve_reservation_write(&id).await?;
        let reservation = cabin
            .reservation(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        let gs = self.get_guest(&reservation.guest_id);
        let mut guest = match &gs {
            Some(g) => Some(g.write().await),
            None => None,
        };

        let payment_ids = self
            .payments_by_reservation
            .get(&id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let removed = payment_ids.len();

        let event = Event::ReservationDeleted {
            id,
            guest_id: reservation.guest_id,
            cabin_id: reservation.cabin_id,
            payment_ids,
        };
        self.wal_append(&event).await?;
        apply_to_cabin(&mut cabin, &event);
        if let Some(g) = guest.as_mut() {
            apply_to_guest(g, &event);
        }
        self.apply_to_indexes(&event);
        info!(%id, payments = removed, "reservation deleted");
        Ok(removed)
    }

    /// Record a payment against an existing reservation.
    /// `recorded_on` defaults to today's local date.
    pub async fn record_payment(
        &self,
        id: Ulid,
        reservation_id: Ulid,
        amount: Cents,
        method: PaymentMethod,
        recorded_on: Option<NaiveDate>,
    ) -> Result<(), EngineError> {
        if amount < 0 {
            return Err(EngineError::InvalidAmount(amount));
        }
        if amount > MAX_AMOUNT_CENTS {
            return Err(EngineError::LimitExceeded("amount too large"));
        }
        let recorded_on = recorded_on.unwrap_or_else(today);
        validate_date(recorded_on)?;

        let _gate = self.commit_gate.read().await;
        let cabin_id = self
            .cabin_for_reservation(&reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?;
        let cs = self
            .get_cabin(&cabin_id)
            .ok_or(EngineError::NotFound(reservation_id))?;
        // Read lock: payments may run in parallel but never with a cascade delete.
        let cabin = cs.read().await;
        if cabin.reservation(reservation_id).is_none() {
            return Err(EngineError::NotFound(reservation_id));
        }
        let create = self.payment_create.lock().await;
        if self.payments.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let existing = self
            .payments_by_reservation
            .get(&reservation_id)
            .map_or(0, |e| e.value().len());
        if existing >= MAX_PAYMENTS_PER_RESERVATION {
            return Err(EngineError::LimitExceeded("too many payments on reservation"));
        }

        let event = Event::PaymentRecorded {
            id,
            reservation_id,
            amount,
            method,
            recorded_on,
        };
        self.wal_append(&event).await?;
        self.apply_to_indexes(&event);
        drop(create);
        drop(cabin);
        debug!(%id, %reservation_id, amount = %format_cents(amount), %method, "payment recorded");
        Ok(())
    }

    /// Rewrite the WAL with just the events needed to rebuild current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Exclusive: no mutation is between its WAL append and its apply.
        let _gate = self.commit_gate.write().await;
        let mut events = Vec::new();

        let mut cabins: Vec<_> = self.cabins.iter().map(|e| e.value().clone()).collect();
        let mut guests: Vec<_> = self.guests.iter().map(|e| e.value().clone()).collect();

        let mut cabin_states = Vec::with_capacity(cabins.len());
        for cs in cabins.drain(..) {
            cabin_states.push(cs.read().await.clone());
        }
        cabin_states.sort_by_key(|c| c.id);
        let mut guest_states = Vec::with_capacity(guests.len());
        for gs in guests.drain(..) {
            guest_states.push(gs.read().await.clone());
        }
        guest_states.sort_by_key(|g| g.id);

        for c in &cabin_states {
            events.push(Event::CabinCreated {
                id: c.id,
                name: c.name.clone(),
                capacity: c.capacity,
            });
        }
        for g in &guest_states {
            events.push(Event::GuestCreated {
                id: g.id,
                name: g.name.clone(),
                document: g.document.clone(),
                phone: g.phone.clone(),
            });
        }
        for c in &cabin_states {
            for r in &c.reservations {
                events.push(Event::ReservationAdmitted {
                    id: r.id,
                    guest_id: r.guest_id,
                    cabin_id: r.cabin_id,
                    stay: r.stay,
                });
                let payment_ids = self
                    .payments_by_reservation
                    .get(&r.id)
                    .map(|e| e.value().clone())
                    .unwrap_or_default();
                for pid in payment_ids {
                    if let Some(p) = self.payments.get(&pid) {
                        events.push(Event::PaymentRecorded {
                            id: p.id,
                            reservation_id: p.reservation_id,
                            amount: p.amount,
                            method: p.method,
                            recorded_on: p.recorded_on,
                        });
                    }
                }
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))?;
        info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
