use crate::model::Poll;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionTally {
    pub count: usize,
    pub voters: Vec<String>,
}

/// Per-option counts and voters, in option order. Voters are listed in
/// the order they first voted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tally {
    pub options: Vec<OptionTally>,
    pub total_voters: usize,
}

impl Tally {
    pub fn of(poll: &Poll) -> Tally {
        let mut options = vec![OptionTally { count: 0, voters: Vec::new() }; poll.options.len()];

        for (user_id, selection) in poll.votes.iter() {
            for index in selection.indices() {
                if let Some(slot) = options.get_mut(index) {
                    slot.count += 1;
                    slot.voters.push(user_id.to_owned());
                }
            }
        }

        Tally {
            options,
            total_voters: poll.votes.len(),
        }
    }

    pub fn count(&self, index: usize) -> usize {
        self.options.get(index).map(|o| o.count).unwrap_or(0)
    }

    /// Share of distinct voters that picked `index`, 0.0 when nobody voted.
    pub fn percentage(&self, index: usize) -> f64 {
        if self.total_voters == 0 {
            return 0.0;
        }
        self.count(index) as f64 / self.total_voters as f64 * 100.0
    }
}
