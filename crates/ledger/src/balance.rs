/// Balances is the stacked credit position of one organization, read from
/// its `payments_customers` row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Balances {
    pub subscription_spu_allowance: f64,
    pub subscription_spus_used: f64,
    pub purchased_credits: f64,
    pub purchased_credits_used: f64,
    pub granted_credits: f64,
    pub granted_credits_used: f64,
}

/// Debits is the amount to apply against each bucket for one usage event,
/// in the fixed order: subscription quota, then purchased, then granted.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Debits {
    pub subscription: f64,
    pub purchased: f64,
    pub granted: f64,
}

impl Balances {
    pub fn subscription_remaining(&self) -> f64 {
        (self.subscription_spu_allowance - self.subscription_spus_used).max(0.0)
    }
    pub fn purchased_remaining(&self) -> f64 {
        (self.purchased_credits - self.purchased_credits_used).max(0.0)
    }
    pub fn granted_remaining(&self) -> f64 {
        (self.granted_credits - self.granted_credits_used).max(0.0)
    }

    /// Total SPUs available across all buckets.
    pub fn available(&self) -> f64 {
        self.subscription_remaining() + self.purchased_remaining() + self.granted_remaining()
    }

    /// Split a usage amount across the buckets in debit order. The debit is
    /// applied even when it exceeds the available balance: the last bucket
    /// absorbs the overflow and may go negative, which is the accepted
    /// outcome of the advisory (non-locking) pre-check.
    pub fn split_debit(&self, spus: f64) -> Debits {
        let mut remaining = spus;
        let mut debits = Debits::default();

        let take = remaining.min(self.subscription_remaining());
        debits.subscription = take;
        remaining -= take;

        let take = remaining.min(self.purchased_remaining());
        debits.purchased = take;
        remaining -= take;

        // Granted credits absorb whatever is left, overdraft included.
        debits.granted = remaining;
        debits
    }
}

#[cfg(test)]
mod test {
    use super::Balances;

    fn balances(sub: f64, purchased: f64, granted: f64) -> Balances {
        Balances {
            subscription_spu_allowance: sub,
            subscription_spus_used: 0.0,
            purchased_credits: purchased,
            purchased_credits_used: 0.0,
            granted_credits: granted,
            granted_credits_used: 0.0,
        }
    }

    #[test]
    fn test_debits_drain_buckets_in_order() {
        let b = balances(10.0, 5.0, 100.0);

        let d = b.split_debit(8.0);
        assert_eq!((d.subscription, d.purchased, d.granted), (8.0, 0.0, 0.0));

        let d = b.split_debit(12.0);
        assert_eq!((d.subscription, d.purchased, d.granted), (10.0, 2.0, 0.0));

        let d = b.split_debit(20.0);
        assert_eq!((d.subscription, d.purchased, d.granted), (10.0, 5.0, 5.0));
    }

    #[test]
    fn test_overdraft_lands_on_granted() {
        let b = balances(0.0, 0.0, 3.0);
        let d = b.split_debit(5.0);
        assert_eq!((d.subscription, d.purchased, d.granted), (0.0, 0.0, 5.0));
    }

    #[test]
    fn test_partially_used_buckets() {
        let mut b = balances(10.0, 10.0, 10.0);
        b.subscription_spus_used = 10.0;
        b.purchased_credits_used = 7.0;

        assert_eq!(b.available(), 13.0);
        let d = b.split_debit(4.0);
        assert_eq!((d.subscription, d.purchased, d.granted), (0.0, 3.0, 1.0));
    }
}
