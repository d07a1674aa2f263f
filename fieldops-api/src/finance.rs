use std::sync::Arc;

use fieldops_access::UserId;
use fieldops_links::LinkError;
use fieldops_links::ProjectShareRegistry;
use fieldops_tickets::DateRange;
use fieldops_tickets::ProjectTxType;
use fieldops_tickets::TicketError;
use fieldops_tickets::TicketService;
use fieldops_tickets::TransferStatus;
use thiserror::Error;

pub type FinanceResult<T> = Result<T, FinanceError>;

#[derive(Debug, Error)]
pub enum FinanceError {
    #[error(transparent)]
    Ticket(#[from] TicketError),
    #[error(transparent)]
    Link(#[from] LinkError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MasterMoney {
    pub earned_minor: i64,
    pub net_profit_minor: i64,
    pub confirmed_minor: i64,
    pub pending_minor: i64,
    pub cash_share_minor: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectSummary {
    pub tickets_net_profit_should_minor: i64,
    pub tickets_net_profit_received_minor: i64,
    pub manual_income_minor: i64,
    pub manual_expense_minor: i64,
    pub project_net_cash_should_minor: i64,
    pub project_net_cash_received_minor: i64,
    pub earned_executor_minor: i64,
    pub earned_admin_minor: i64,
    pub earned_junior_minor: i64,
    pub project_take_sum_minor: i64,
    pub closed_count: u64,
    pub confirmed_count: u64,
    pub repeats_count: u64,
}

/// Reads over closed tickets and manual project transactions; never writes.
/// Grounded on the three money views the host queries keep separate: what a
/// master is owed, what an admin/junior earned as a creator/subcontractor,
/// and the whole-project rollup.
pub struct FinanceAggregator {
    tickets: Arc<dyn TicketService>,
    shares: Arc<dyn ProjectShareRegistry>,
}

impl FinanceAggregator {
    #[must_use]
    pub fn new(tickets: Arc<dyn TicketService>, shares: Arc<dyn ProjectShareRegistry>) -> Self {
        Self { tickets, shares }
    }

    pub async fn master_money(&self, master_id: UserId, range: DateRange) -> FinanceResult<MasterMoney> {
        let closed = self.tickets.list_closed(range).await?;

        let mut earned_executor = 0i64;
        let mut to_transfer_total = 0i64;
        let mut confirmed = 0i64;
        for ticket in closed.iter().filter(|t| t.assigned_executor_id == Some(master_id)) {
            let executor_earned = ticket.executor_earned_minor.unwrap_or(0);
            let to_transfer = ticket.net_profit_minor.unwrap_or(0) - executor_earned;
            earned_executor += executor_earned;
            to_transfer_total += to_transfer;
            if ticket.transfer_status == TransferStatus::Confirmed {
                confirmed += to_transfer;
            }
        }

        let earned_admin: i64 = closed
            .iter()
            .filter(|t| t.created_by_user_id == master_id)
            .map(|t| t.admin_earned_minor.unwrap_or(0))
            .sum();

        let total_net_cash: i64 = closed.iter().map(|t| t.net_profit_minor.unwrap_or(0)).sum();
        let cash_share_minor = match self.shares.active_share_for(master_id).await? {
            Some(share) => share.percent.apply_half_up(total_net_cash),
            None => 0,
        };

        let earned = earned_executor + earned_admin + cash_share_minor;
        let pending = (to_transfer_total - confirmed).max(0);
        Ok(MasterMoney {
            earned_minor: earned,
            net_profit_minor: to_transfer_total,
            confirmed_minor: confirmed,
            pending_minor: pending,
            cash_share_minor,
        })
    }

    pub async fn admin_salary(&self, admin_id: UserId, range: DateRange) -> FinanceResult<i64> {
        let closed = self.tickets.list_closed(range).await?;
        Ok(closed
            .iter()
            .filter(|t| t.created_by_user_id == admin_id)
            .map(|t| t.admin_earned_minor.unwrap_or(0))
            .sum())
    }

    pub async fn junior_salary(&self, junior_id: UserId, range: DateRange) -> FinanceResult<i64> {
        let closed = self.tickets.list_closed(range).await?;
        Ok(closed
            .iter()
            .filter(|t| t.junior_master_id == Some(junior_id))
            .map(|t| t.junior_earned_minor.unwrap_or(0))
            .sum())
    }

    pub async fn project_summary(&self, range: DateRange) -> FinanceResult<ProjectSummary> {
        let closed = self.tickets.list_closed(range).await?;
        let transactions = self.tickets.list_project_transactions(range).await?;

        let tickets_net_profit_should_minor = closed.iter().map(|t| t.net_profit_minor.unwrap_or(0)).sum();
        let tickets_net_profit_received_minor = closed
            .iter()
            .filter(|t| t.transfer_status == TransferStatus::Confirmed)
            .map(|t| t.net_profit_minor.unwrap_or(0))
            .sum();
        let earned_executor_minor = closed.iter().map(|t| t.executor_earned_minor.unwrap_or(0)).sum();
        let earned_admin_minor = closed.iter().map(|t| t.admin_earned_minor.unwrap_or(0)).sum();
        let earned_junior_minor = closed.iter().map(|t| t.junior_earned_minor.unwrap_or(0)).sum();
        let project_take_sum_minor = closed.iter().map(|t| t.project_take_minor.unwrap_or(0)).sum();
        let closed_count = closed.len() as u64;
        let confirmed_count = closed
            .iter()
            .filter(|t| t.transfer_status == TransferStatus::Confirmed)
            .count() as u64;
        let repeats_count = closed.iter().filter(|t| t.is_repeat).count() as u64;

        let manual_income_minor = transactions
            .iter()
            .filter(|tx| tx.tx_type == ProjectTxType::Income)
            .map(|tx| tx.amount_minor)
            .sum();
        let manual_expense_minor: i64 = transactions
            .iter()
            .filter(|tx| tx.tx_type == ProjectTxType::Expense)
            .map(|tx| tx.amount_minor)
            .sum();

        Ok(ProjectSummary {
            tickets_net_profit_should_minor,
            tickets_net_profit_received_minor,
            manual_income_minor,
            manual_expense_minor,
            project_net_cash_should_minor: tickets_net_profit_should_minor + manual_income_minor
                - manual_expense_minor,
            project_net_cash_received_minor: tickets_net_profit_received_minor + manual_income_minor
                - manual_expense_minor,
            earned_executor_minor,
            earned_admin_minor,
            earned_junior_minor,
            project_take_sum_minor,
            closed_count,
            confirmed_count,
            repeats_count,
        })
    }
}
