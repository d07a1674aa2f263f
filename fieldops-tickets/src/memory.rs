use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use chrono::Utc;
use fieldops_access::AccessGate;
use fieldops_access::Operation;
use fieldops_access::PermissionTable;
use fieldops_access::User;
use fieldops_audit::AuditLog;
use fieldops_audit::AuditPayload;
use fieldops_audit::NewAuditEvent;
use fieldops_audit::NewTicketEvent;
use fieldops_audit::INVALID_STATE_TRANSITION;
use fieldops_audit::PERMISSION_DENIED;
use tokio::sync::Mutex;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::payout;
use crate::CloseRequest;
use crate::DateRange;
use crate::LeadConversionHook;
use crate::MoneyOpType;
use crate::NewProjectTransaction;
use crate::NewTicketRequest;
use crate::ProjectTransaction;
use crate::Ticket;
use crate::TicketClosePhoto;
use crate::TicketError;
use crate::TicketId;
use crate::TicketMoneyOperation;
use crate::TicketResult;
use crate::TicketService;
use crate::TicketStatus;
use crate::TransferStatus;

#[derive(Default)]
struct State {
    ticket_seq: TicketId,
    tickets: HashMap<TicketId, Ticket>,
    daily_counters: HashMap<NaiveDate, u8>,
    close_photos: HashMap<TicketId, Vec<TicketClosePhoto>>,
    money_operations: HashMap<TicketId, Vec<TicketMoneyOperation>>,
    project_transactions: Vec<ProjectTransaction>,
}

pub struct InMemoryTicketService {
    access: Arc<dyn AccessGate>,
    audit: Arc<dyn AuditLog>,
    photo_limit: usize,
    state: Mutex<State>,
}

impl InMemoryTicketService {
    #[must_use]
    pub fn new(access: Arc<dyn AccessGate>, audit: Arc<dyn AuditLog>, photo_limit: usize) -> Self {
        Self {
            access,
            audit,
            photo_limit,
            state: Mutex::new(State::default()),
        }
    }

    async fn deny(&self, entity_id: Option<TicketId>, actor: &User, operation: Operation) -> TicketError {
        warn!(actor_id = actor.id, ?entity_id, reason = operation.reason_code(), "permission denied");
        let entity_type = match operation {
            Operation::AddProjectTransaction => "project_transaction",
            _ => "ticket",
        };
        let _ = self
            .audit
            .record_audit_event(NewAuditEvent {
                actor_id: Some(actor.id),
                action: PERMISSION_DENIED.to_string(),
                entity_type: entity_type.to_string(),
                entity_id: entity_id.map(|id| id.to_string()),
                payload: AuditPayload::denial(operation.reason_code()),
            })
            .await;
        TicketError::Denied(format!("role {} cannot perform {}", actor.role, operation.reason_code()))
    }

    async fn invalid_transition(&self, ticket_id: TicketId, actor_id: i64, reason: &str) -> TicketError {
        warn!(ticket_id, actor_id, reason, "invalid ticket transition");
        let _ = self
            .audit
            .record_ticket_event(NewTicketEvent {
                ticket_id,
                actor_id: Some(actor_id),
                action: INVALID_STATE_TRANSITION.to_string(),
                payload: AuditPayload::denial(reason),
            })
            .await;
        TicketError::InvalidState(reason.to_string())
    }

    async fn next_sequence_locked(state: &mut State, date: NaiveDate) -> TicketResult<u8> {
        let counter = state.daily_counters.entry(date).or_insert(0);
        if *counter >= 99 {
            return Err(TicketError::Exhausted(format!(
                "daily public-id counter exhausted for {date}"
            )));
        }
        *counter += 1;
        Ok(*counter)
    }

    async fn create_inner(
        &self,
        request: NewTicketRequest,
        actor: &User,
        lead_hook: Option<&(dyn LeadConversionHook + '_)>,
    ) -> TicketResult<Ticket> {
        if !PermissionTable::is_allowed(actor.role, Operation::CreateTicket) {
            return Err(self.deny(None, actor, Operation::CreateTicket).await);
        }
        let normalized = request.normalize()?;

        let mut guard = self.state.lock().await;
        let today = Utc::now().date_naive();
        let sequence = Self::next_sequence_locked(&mut guard, today).await?;
        let public_id = crate::format_public_id(today, sequence);

        guard.ticket_seq += 1;
        let id = guard.ticket_seq;
        let now = Utc::now();
        let ticket = Ticket {
            id,
            public_id,
            status: TicketStatus::ReadyForWork,
            category: normalized.category,
            client_phone: normalized.client_phone,
            client_address: normalized.client_address,
            scheduled_at: normalized.scheduled_at,
            preferred_date_dm: normalized.preferred_date_dm,
            problem_text: normalized.problem_text,
            special_note: normalized.special_note,
            ad_source: normalized.ad_source,
            is_repeat: normalized.is_repeat,
            repeat_ticket_ids: normalized.repeat_ticket_ids,
            lead_id: normalized.lead_id,
            created_by_user_id: actor.id,
            assigned_executor_id: None,
            junior_master_id: None,
            taken_at: None,
            revenue_minor: None,
            expense_minor: None,
            net_profit_minor: None,
            executor_percent_at_close: None,
            admin_percent_at_close: None,
            junior_percent_at_close: None,
            executor_earned_minor: None,
            admin_earned_minor: None,
            junior_earned_minor: None,
            project_take_minor: None,
            transfer_status: TransferStatus::NotSent,
            transfer_sent_at: None,
            transfer_confirmed_at: None,
            transfer_confirmed_by: None,
            closed_at: None,
            closed_by_user_id: None,
            closed_comment: None,
            created_at: now,
            updated_at: now,
        };
        guard.tickets.insert(id, ticket.clone());

        // Flip the paired lead inside the same critical section that just
        // inserted the ticket: if this fails, undo the insert so the two
        // aggregates can never diverge.
        if let Some(hook) = lead_hook {
            if let Err(err) = hook.mark_converted(id).await {
                guard.tickets.remove(&id);
                drop(guard);
                warn!(ticket_id = id, actor_id = actor.id, error = %err, "lead conversion failed, ticket create rolled back");
                return Err(TicketError::Infra(format!(
                    "lead conversion failed, ticket creation rolled back: {err}"
                )));
            }
        }
        drop(guard);

        let _ = self
            .audit
            .record_ticket_event(NewTicketEvent {
                ticket_id: id,
                actor_id: Some(actor.id),
                action: "TICKET_CREATED".to_string(),
                payload: AuditPayload {
                    before: None,
                    after: Some(serde_json::json!({"status": "READY_FOR_WORK"})),
                    reason: None,
                    context: serde_json::Map::new(),
                },
            })
            .await;

        info!(ticket_id = id, public_id = %ticket.public_id, actor_id = actor.id, "ticket created");
        Ok(ticket)
    }
}

#[async_trait]
impl TicketService for InMemoryTicketService {
    async fn create(&self, request: NewTicketRequest, actor: &User) -> TicketResult<Ticket> {
        self.create_inner(request, actor, None).await
    }

    async fn create_for_lead(
        &self,
        request: NewTicketRequest,
        actor: &User,
        lead_hook: &(dyn LeadConversionHook + '_),
    ) -> TicketResult<Ticket> {
        self.create_inner(request, actor, Some(lead_hook)).await
    }

    async fn take(&self, ticket_id: TicketId, actor: &User) -> TicketResult<Ticket> {
        if !PermissionTable::is_allowed(actor.role, Operation::TakeTicket) {
            return Err(self.deny(Some(ticket_id), actor, Operation::TakeTicket).await);
        }
        let mut guard = self.state.lock().await;
        let ticket = guard
            .tickets
            .get_mut(&ticket_id)
            .ok_or_else(|| TicketError::Validation(format!("ticket {ticket_id} not found")))?;

        if ticket.status != TicketStatus::ReadyForWork || ticket.assigned_executor_id.is_some() {
            drop(guard);
            return Err(self
                .invalid_transition(ticket_id, actor.id, "ticket already taken")
                .await);
        }

        let before = serde_json::json!({"status": "READY_FOR_WORK", "assigned_executor_id": null});
        ticket.assigned_executor_id = Some(actor.id);
        ticket.status = TicketStatus::InWork;
        ticket.taken_at = Some(Utc::now());
        ticket.updated_at = Utc::now();
        let after = serde_json::json!({"status": "IN_WORK", "assigned_executor_id": actor.id});
        let result = ticket.clone();
        drop(guard);

        let _ = self
            .audit
            .record_ticket_event(NewTicketEvent {
                ticket_id,
                actor_id: Some(actor.id),
                action: "TICKET_TAKEN".to_string(),
                payload: AuditPayload {
                    before: Some(before),
                    after: Some(after),
                    reason: None,
                    context: serde_json::Map::new(),
                },
            })
            .await;

        info!(ticket_id, actor_id = actor.id, "ticket taken");
        Ok(result)
    }

    async fn set_in_progress(&self, ticket_id: TicketId, actor: &User) -> TicketResult<Ticket> {
        let mut guard = self.state.lock().await;
        let ticket = guard
            .tickets
            .get_mut(&ticket_id)
            .ok_or_else(|| TicketError::Validation(format!("ticket {ticket_id} not found")))?;

        let permitted = ticket.is_executor(actor.id) || crate::is_super_override(actor.role);
        if !permitted {
            drop(guard);
            return Err(self
                .deny(Some(ticket_id), actor, Operation::SetInProgress)
                .await);
        }

        let precondition = matches!(
            ticket.status,
            TicketStatus::InWork | TicketStatus::Waiting
        );
        if !precondition {
            drop(guard);
            return Err(self
                .invalid_transition(ticket_id, actor.id, "ticket is not in a workable status")
                .await);
        }

        ticket.status = TicketStatus::InProgress;
        ticket.updated_at = Utc::now();
        let result = ticket.clone();
        drop(guard);

        let _ = self
            .audit
            .record_ticket_event(NewTicketEvent {
                ticket_id,
                actor_id: Some(actor.id),
                action: "TICKET_IN_PROGRESS".to_string(),
                payload: AuditPayload::transition(
                    serde_json::json!({"status": "IN_WORK"}),
                    serde_json::json!({"status": "IN_PROGRESS"}),
                ),
            })
            .await;

        info!(ticket_id, actor_id = actor.id, "ticket set in progress");
        Ok(result)
    }

    async fn close(
        &self,
        ticket_id: TicketId,
        actor: &User,
        request: CloseRequest,
    ) -> TicketResult<Ticket> {
        if !PermissionTable::is_allowed(actor.role, Operation::CloseTicket) {
            return Err(self.deny(Some(ticket_id), actor, Operation::CloseTicket).await);
        }

        let mut guard = self.state.lock().await;
        let existing = guard
            .tickets
            .get(&ticket_id)
            .ok_or_else(|| TicketError::Validation(format!("ticket {ticket_id} not found")))?
            .clone();
        drop(guard);

        if !(existing.is_executor(actor.id) || crate::is_super_override(actor.role)) {
            return Err(self.deny(Some(ticket_id), actor, Operation::CloseTicket).await);
        }

        let reclosing = existing.status == TicketStatus::Closed;
        if reclosing && !crate::is_super_override(actor.role) {
            return Err(self.deny(Some(ticket_id), actor, Operation::CloseTicket).await);
        }
        if !reclosing && existing.status != TicketStatus::InProgress {
            return Err(self
                .invalid_transition(ticket_id, actor.id, "ticket is not in progress")
                .await);
        }

        if request.revenue_minor < 0 || request.expense_minor < 0 {
            return Err(TicketError::Validation("revenue/expense cannot be negative".into()));
        }

        let executor = self
            .access
            .get_user(
                existing
                    .assigned_executor_id
                    .ok_or_else(|| TicketError::Infra("closed ticket has no executor".into()))?,
            )
            .await
            .map_err(|err| TicketError::Infra(err.to_string()))?;
        let creator = self
            .access
            .get_user(existing.created_by_user_id)
            .await
            .map_err(|err| TicketError::Infra(err.to_string()))?;

        let executor_percent = executor.master_percent.unwrap_or(fieldops_access::Percent::ZERO);
        let admin_percent = creator.admin_percent.unwrap_or(fieldops_access::Percent::ZERO);
        let junior_percent = request
            .junior_percent
            .unwrap_or(fieldops_access::Percent::ZERO);

        let outputs = payout::calculate_payout(payout::PayoutInputs {
            revenue_minor: request.revenue_minor,
            expense_minor: request.expense_minor,
            executor_percent_hundredths: executor_percent.as_hundredths(),
            admin_percent_hundredths: admin_percent.as_hundredths(),
            junior_percent_hundredths: junior_percent.as_hundredths(),
        });
        let Some(outputs) = outputs else {
            return Err(self
                .invalid_transition(ticket_id, actor.id, "payouts_invalid")
                .await);
        };

        if request.photos.len() > self.photo_limit {
            return Err(TicketError::Exhausted(format!(
                "close photo limit {} exceeded",
                self.photo_limit
            )));
        }

        let mut guard = self.state.lock().await;
        let ticket = guard
            .tickets
            .get_mut(&ticket_id)
            .ok_or_else(|| TicketError::Validation(format!("ticket {ticket_id} not found")))?;
        let reclosing = ticket.status == TicketStatus::Closed;
        if reclosing && !crate::is_super_override(actor.role) {
            drop(guard);
            return Err(self.deny(Some(ticket_id), actor, Operation::CloseTicket).await);
        }
        if !reclosing && ticket.status != TicketStatus::InProgress {
            drop(guard);
            return Err(self
                .invalid_transition(ticket_id, actor.id, "ticket is not in progress")
                .await);
        }

        let previous_revenue = ticket.revenue_minor.unwrap_or(0);
        let previous_expense = ticket.expense_minor.unwrap_or(0);
        let income_delta = request.revenue_minor - previous_revenue;
        let expense_delta = request.expense_minor - previous_expense;

        let before = serde_json::json!({"status": format!("{:?}", ticket.status)});
        ticket.status = TicketStatus::Closed;
        ticket.closed_at = Some(Utc::now());
        ticket.closed_by_user_id = Some(actor.id);
        ticket.closed_comment = request.closed_comment.clone();
        ticket.revenue_minor = Some(request.revenue_minor);
        ticket.expense_minor = Some(request.expense_minor);
        ticket.net_profit_minor = Some(outputs.net_profit_minor);
        ticket.transfer_status = TransferStatus::NotSent;
        ticket.transfer_sent_at = None;
        ticket.transfer_confirmed_at = None;
        ticket.transfer_confirmed_by = None;
        ticket.executor_percent_at_close = Some(executor_percent);
        ticket.admin_percent_at_close = Some(admin_percent);
        ticket.executor_earned_minor = Some(outputs.executor_earned_minor);
        ticket.admin_earned_minor = Some(outputs.admin_earned_minor);
        ticket.project_take_minor = Some(outputs.project_take_minor);
        if let Some(junior_id) = request.junior_master_id {
            ticket.junior_master_id = Some(junior_id);
            ticket.junior_percent_at_close = Some(junior_percent);
            ticket.junior_earned_minor = Some(outputs.junior_earned_minor);
        }
        ticket.updated_at = Utc::now();
        let result = ticket.clone();

        let photo_list = guard.close_photos.entry(ticket_id).or_default();
        for file_ref in &request.photos {
            photo_list.push(TicketClosePhoto {
                id: Uuid::new_v4(),
                ticket_id,
                file_ref: file_ref.clone(),
                created_at: Utc::now(),
            });
        }

        let money_ops = guard.money_operations.entry(ticket_id).or_default();
        if income_delta != 0 {
            money_ops.push(TicketMoneyOperation {
                id: Uuid::new_v4(),
                ticket_id,
                op_type: MoneyOpType::Income,
                amount_minor: income_delta.abs(),
                category_snapshot: result.category,
                comment: request.closed_comment.clone(),
                created_at: Utc::now(),
            });
        }
        if expense_delta != 0 {
            money_ops.push(TicketMoneyOperation {
                id: Uuid::new_v4(),
                ticket_id,
                op_type: MoneyOpType::Expense,
                amount_minor: expense_delta.abs(),
                category_snapshot: result.category,
                comment: request.closed_comment.clone(),
                created_at: Utc::now(),
            });
        }
        drop(guard);

        let after = serde_json::json!({
            "status": "CLOSED",
            "net_profit_minor": outputs.net_profit_minor,
        });
        let _ = self
            .audit
            .record_ticket_event(NewTicketEvent {
                ticket_id,
                actor_id: Some(actor.id),
                action: "TICKET_CLOSED".to_string(),
                payload: AuditPayload::transition(before.clone(), after.clone()),
            })
            .await;
        let _ = self
            .audit
            .record_ticket_event(NewTicketEvent {
                ticket_id,
                actor_id: Some(actor.id),
                action: "TICKET_PAYOUTS_FIXED".to_string(),
                payload: AuditPayload {
                    before: None,
                    after: Some(after),
                    reason: None,
                    context: serde_json::Map::new(),
                },
            })
            .await;

        info!(
            ticket_id,
            actor_id = actor.id,
            net_profit_minor = outputs.net_profit_minor,
            "ticket closed"
        );
        Ok(result)
    }

    async fn mark_transfer_sent(&self, ticket_id: TicketId, actor: &User) -> TicketResult<Ticket> {
        let mut guard = self.state.lock().await;
        let ticket = guard
            .tickets
            .get_mut(&ticket_id)
            .ok_or_else(|| TicketError::Validation(format!("ticket {ticket_id} not found")))?;

        if !ticket.is_executor(actor.id) {
            drop(guard);
            return Err(self
                .deny(Some(ticket_id), actor, Operation::MarkTransferSent)
                .await);
        }
        if ticket.status != TicketStatus::Closed || ticket.transfer_status != TransferStatus::NotSent {
            drop(guard);
            return Err(self
                .invalid_transition(ticket_id, actor.id, "transfer is not pending")
                .await);
        }

        ticket.transfer_status = TransferStatus::Sent;
        ticket.transfer_sent_at = Some(Utc::now());
        ticket.updated_at = Utc::now();
        let result = ticket.clone();
        drop(guard);

        let _ = self
            .audit
            .record_ticket_event(NewTicketEvent {
                ticket_id,
                actor_id: Some(actor.id),
                action: "TICKET_TRANSFER_SENT".to_string(),
                payload: AuditPayload::transition(
                    serde_json::json!({"transfer_status": "NOT_SENT"}),
                    serde_json::json!({"transfer_status": "SENT"}),
                ),
            })
            .await;

        info!(ticket_id, actor_id = actor.id, "transfer marked sent");
        Ok(result)
    }

    async fn confirm_transfer(
        &self,
        ticket_id: TicketId,
        actor: &User,
        approved: bool,
    ) -> TicketResult<Ticket> {
        if !PermissionTable::is_allowed(actor.role, Operation::ConfirmTransfer) {
            return Err(self
                .deny(Some(ticket_id), actor, Operation::ConfirmTransfer)
                .await);
        }

        let mut guard = self.state.lock().await;
        let ticket = guard
            .tickets
            .get_mut(&ticket_id)
            .ok_or_else(|| TicketError::Validation(format!("ticket {ticket_id} not found")))?;
        if ticket.transfer_status != TransferStatus::Sent {
            drop(guard);
            return Err(self
                .invalid_transition(ticket_id, actor.id, "transfer is not awaiting confirmation")
                .await);
        }

        ticket.transfer_status = if approved {
            TransferStatus::Confirmed
        } else {
            TransferStatus::Rejected
        };
        ticket.transfer_confirmed_at = Some(Utc::now());
        ticket.transfer_confirmed_by = Some(actor.id);
        ticket.updated_at = Utc::now();
        let result = ticket.clone();
        drop(guard);

        let _ = self
            .audit
            .record_ticket_event(NewTicketEvent {
                ticket_id,
                actor_id: Some(actor.id),
                action: "TICKET_TRANSFER_CONFIRMED".to_string(),
                payload: AuditPayload::transition(
                    serde_json::json!({"transfer_status": "SENT"}),
                    serde_json::json!({"transfer_status": if approved {"CONFIRMED"} else {"REJECTED"}}),
                ),
            })
            .await;

        info!(ticket_id, actor_id = actor.id, approved, "transfer confirmation recorded");
        Ok(result)
    }

    async fn cancel(&self, ticket_id: TicketId, actor: &User) -> TicketResult<Ticket> {
        if !PermissionTable::is_allowed(actor.role, Operation::CancelTicket) {
            return Err(self
                .deny(Some(ticket_id), actor, Operation::CancelTicket)
                .await);
        }

        let mut guard = self.state.lock().await;
        let ticket = guard
            .tickets
            .get_mut(&ticket_id)
            .ok_or_else(|| TicketError::Validation(format!("ticket {ticket_id} not found")))?;
        let previous_status = format!("{:?}", ticket.status);
        ticket.status = TicketStatus::Cancelled;
        ticket.updated_at = Utc::now();
        let result = ticket.clone();
        drop(guard);

        let _ = self
            .audit
            .record_ticket_event(NewTicketEvent {
                ticket_id,
                actor_id: Some(actor.id),
                action: "TICKET_CANCELLED".to_string(),
                payload: AuditPayload {
                    before: Some(serde_json::json!({"status": previous_status})),
                    after: Some(serde_json::json!({"status": "CANCELLED"})),
                    reason: None,
                    context: serde_json::Map::new(),
                },
            })
            .await;

        info!(ticket_id, actor_id = actor.id, "ticket cancelled");
        Ok(result)
    }

    async fn get(&self, ticket_id: TicketId) -> TicketResult<Ticket> {
        let guard = self.state.lock().await;
        guard
            .tickets
            .get(&ticket_id)
            .cloned()
            .ok_or_else(|| TicketError::Validation(format!("ticket {ticket_id} not found")))
    }

    async fn list(&self) -> TicketResult<Vec<Ticket>> {
        let guard = self.state.lock().await;
        let mut tickets: Vec<_> = guard.tickets.values().cloned().collect();
        tickets.sort_by_key(|ticket| ticket.id);
        Ok(tickets)
    }

    async fn list_closed(&self, range: DateRange) -> TicketResult<Vec<Ticket>> {
        let guard = self.state.lock().await;
        let mut tickets: Vec<_> = guard
            .tickets
            .values()
            .filter(|ticket| ticket.status == TicketStatus::Closed)
            .filter(|ticket| ticket.closed_at.is_some_and(|ts| range.contains(ts)))
            .cloned()
            .collect();
        tickets.sort_by_key(|ticket| ticket.id);
        Ok(tickets)
    }

    async fn money_operations(&self, ticket_id: TicketId) -> TicketResult<Vec<TicketMoneyOperation>> {
        let guard = self.state.lock().await;
        Ok(guard.money_operations.get(&ticket_id).cloned().unwrap_or_default())
    }

    async fn close_photos(&self, ticket_id: TicketId) -> TicketResult<Vec<TicketClosePhoto>> {
        let guard = self.state.lock().await;
        Ok(guard.close_photos.get(&ticket_id).cloned().unwrap_or_default())
    }

    async fn add_project_transaction(
        &self,
        request: NewProjectTransaction,
        actor: &User,
    ) -> TicketResult<ProjectTransaction> {
        if !PermissionTable::is_allowed(actor.role, Operation::AddProjectTransaction) {
            return Err(self
                .deny(None, actor, Operation::AddProjectTransaction)
                .await);
        }
        if request.amount_minor <= 0 {
            return Err(TicketError::Validation("amount must be positive".into()));
        }

        let transaction = ProjectTransaction {
            id: Uuid::new_v4(),
            tx_type: request.tx_type,
            amount_minor: request.amount_minor,
            category: request.category.clone(),
            comment: request.comment.clone(),
            occurred_at: request.occurred_at,
            created_by: actor.id,
            created_at: Utc::now(),
        };

        let mut guard = self.state.lock().await;
        guard.project_transactions.push(transaction.clone());
        drop(guard);

        let _ = self
            .audit
            .record_audit_event(NewAuditEvent {
                actor_id: Some(actor.id),
                action: "PROJECT_TX_ADDED".to_string(),
                entity_type: "project_transaction".to_string(),
                entity_id: Some(transaction.id.to_string()),
                payload: AuditPayload {
                    before: None,
                    after: Some(serde_json::json!({"amount_minor": request.amount_minor})),
                    reason: None,
                    context: serde_json::Map::new(),
                },
            })
            .await;

        info!(tx_id = %transaction.id, actor_id = actor.id, "project transaction recorded");
        Ok(transaction)
    }

    async fn list_project_transactions(&self, range: DateRange) -> TicketResult<Vec<ProjectTransaction>> {
        let guard = self.state.lock().await;
        Ok(guard
            .project_transactions
            .iter()
            .filter(|tx| range.contains(tx.occurred_at))
            .cloned()
            .collect())
    }
}
