use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::calendar::occupancy_grid;
use super::conflict::{first_conflict, validate_stay, validate_window};
use super::{Engine, EngineError, SharedCabinState};

impl Engine {
    /// Day-by-day occupancy of one cabin from `start` to `end`, inclusive.
    /// An unknown cabin has no reservations, so its grid is empty.
    pub async fn compute_availability(
        &self,
        cabin_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DayStatus>, EngineError> {
        validate_window(start, end)?;
        let Some(cs) = self.get_cabin(&cabin_id) else {
            return Ok(Vec::new());
        };
        let guard = cs.read().await;
        Ok(occupancy_grid(&guard, start, end))
    }

    /// Occupancy grids for every cabin, ordered by cabin name.
    pub async fn compute_availability_all(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CabinAvailability>, EngineError> {
        validate_window(start, end)?;
        let mut out = Vec::new();
        for cs in self.cabin_handles() {
            let guard = cs.read().await;
            out.push(CabinAvailability {
                cabin: cabin_info(&guard),
                days: occupancy_grid(&guard, start, end),
            });
        }
        out.sort_by(|a, b| a.cabin.name.cmp(&b.cabin.name).then(a.cabin.id.cmp(&b.cabin.id)));
        Ok(out)
    }

    /// Would `[check_in, check_out)` be admitted right now? Read-only; a
    /// later admission can still lose the race.
    pub async fn is_stay_free(
        &self,
        cabin_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<bool, EngineError> {
        let stay = validate_stay(check_in, check_out)?;
        let cs = self.get_cabin(&cabin_id).ok_or(EngineError::NotFound(cabin_id))?;
        let guard = cs.read().await;
        Ok(first_conflict(&guard, &stay).is_none())
    }

    pub async fn list_cabins(&self) -> Vec<CabinInfo> {
        let mut out = Vec::new();
        for cs in self.cabin_handles() {
            out.push(cabin_info(&*cs.read().await));
        }
        out.sort_by_key(|c| c.id);
        out
    }

    pub async fn list_guests(&self) -> Vec<GuestInfo> {
        let handles: Vec<_> = self.guests.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(handles.len());
        for gs in handles {
            let g = gs.read().await;
            out.push(GuestInfo {
                id: g.id,
                name: g.name.clone(),
                document: g.document.clone(),
                phone: g.phone.clone(),
            });
        }
        out.sort_by_key(|g| g.id);
        out
    }

    /// Reservations with guest and cabin names, optionally for one cabin,
    /// ordered by check-in.
    pub async fn list_reservations(&self, cabin_id: Option<Ulid>) -> Vec<ReservationView> {
        let handles: Vec<SharedCabinState> = match cabin_id {
            Some(id) => self.get_cabin(&id).into_iter().collect(),
            None => self.cabin_handles(),
        };

        let mut reservations = Vec::new();
        for cs in handles {
            let guard = cs.read().await;
            reservations.extend(
                guard
                    .reservations
                    .iter()
                    .map(|r| (r.clone(), guard.name.clone())),
            );
        }

        let mut out = Vec::with_capacity(reservations.len());
        for (r, cabin_name) in reservations {
            let guest_name = match self.get_guest(&r.guest_id) {
                Some(gs) => gs.read().await.name.clone(),
                None => String::new(),
            };
            out.push(ReservationView {
                id: r.id,
                guest_id: r.guest_id,
                guest_name,
                cabin_id: r.cabin_id,
                cabin_name,
                stay: r.stay,
            });
        }
        out.sort_by(|a, b| a.stay.check_in.cmp(&b.stay.check_in).then(a.id.cmp(&b.id)));
        out
    }

    /// Payments, optionally for one reservation, by recorded date.
    pub fn list_payments(&self, reservation_id: Option<Ulid>) -> Vec<Payment> {
        let mut out: Vec<Payment> = match reservation_id {
            Some(rid) => self
                .payments_by_reservation
                .get(&rid)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|pid| self.payments.get(pid).map(|p| p.value().clone()))
                        .collect()
                })
                .unwrap_or_default(),
            None => self.payments.iter().map(|e| e.value().clone()).collect(),
        };
        out.sort_by(|a, b| a.recorded_on.cmp(&b.recorded_on).then(a.id.cmp(&b.id)));
        out
    }

    pub async fn cabin(&self, id: Ulid) -> Result<CabinInfo, EngineError> {
        let cs = self.get_cabin(&id).ok_or(EngineError::NotFound(id))?;
        let guard = cs.read().await;
        Ok(cabin_info(&guard))
    }

    pub async fn guest(&self, id: Ulid) -> Result<GuestInfo, EngineError> {
        let gs = self.get_guest(&id).ok_or(EngineError::NotFound(id))?;
        let g = gs.read().await;
        Ok(GuestInfo {
            id: g.id,
            name: g.name.clone(),
            document: g.document.clone(),
            phone: g.phone.clone(),
        })
    }

    pub async fn reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let cabin_id = self.cabin_for_reservation(&id).ok_or(EngineError::NotFound(id))?;
        let cs = self.get_cabin(&cabin_id).ok_or(EngineError::NotFound(id))?;
        let guard = cs.read().await;
        guard.reservation(id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub fn payment(&self, id: Ulid) -> Result<Payment, EngineError> {
        self.payments
            .get(&id)
            .map(|p| p.value().clone())
            .ok_or(EngineError::NotFound(id))
    }

    /// Payments recorded in the given calendar month, and their sum.
    pub fn monthly_revenue(&self, month: u32, year: i32) -> Result<RevenueReport, EngineError> {
        if !(1..=12).contains(&month) {
            return Err(EngineError::InvalidMonth(month));
        }
        if !(MIN_VALID_YEAR..=MAX_VALID_YEAR).contains(&year) {
            return Err(EngineError::LimitExceeded("year out of range"));
        }
        let mut payments: Vec<Payment> = self
            .payments
            .iter()
            .filter(|e| e.value().falls_in_month(month, year))
            .map(|e| e.value().clone())
            .collect();
        payments.sort_by(|a, b| a.recorded_on.cmp(&b.recorded_on).then(a.id.cmp(&b.id)));
        let total = payments
            .iter()
            .fold(0 as Cents, |acc, p| acc.saturating_add(p.amount));
        Ok(RevenueReport {
            month,
            year,
            payments,
            total,
        })
    }

    fn cabin_handles(&self) -> Vec<SharedCabinState> {
        self.cabins.iter().map(|e| e.value().clone()).collect()
    }
}

fn cabin_info(cabin: &CabinState) -> CabinInfo {
    CabinInfo {
        id: cabin.id,
        name: cabin.name.clone(),
        capacity: cabin.capacity,
    }
}
