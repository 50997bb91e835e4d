//! Controller selection predicates.
//!
//! A [`ControllerCriteria`] is a set of optional predicates that must all
//! hold.  [`Criteria`] is a list of alternatives: a controller is accepted if
//! any alternative matches, and an empty list accepts every controller.

use crate::controller_info::{format_mac, SIGNATURE_LEN};

/// What a transport learns about a controller before connecting.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ControllerAdvert {
    pub name: String,
    pub mac: [u8; 6],
    pub network: [u8; SIGNATURE_LEN],
    pub fw_version: String,
    pub product_code: u16,
    pub commissionable: bool,
    /// Signal strength in dBm; higher is stronger.
    pub rssi: i16,
}

impl ControllerAdvert {
    pub fn mac_string(&self) -> String {
        format_mac(&self.mac)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ControllerCriteria {
    pub name: Option<String>,
    pub name_prefix: Option<String>,
    pub mac: Option<[u8; 6]>,
    pub network: Option<[u8; SIGNATURE_LEN]>,
    pub fw_version: Option<String>,
    pub product: Option<u16>,
    pub commissionable: Option<bool>,
}

impl ControllerCriteria {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    pub fn mac(mut self, mac: [u8; 6]) -> Self {
        self.mac = Some(mac);
        self
    }

    pub fn network(mut self, network: [u8; SIGNATURE_LEN]) -> Self {
        self.network = Some(network);
        self
    }

    pub fn fw_version(mut self, version: impl Into<String>) -> Self {
        self.fw_version = Some(version.into());
        self
    }

    pub fn product(mut self, product: u16) -> Self {
        self.product = Some(product);
        self
    }

    pub fn commissionable(mut self, commissionable: bool) -> Self {
        self.commissionable = Some(commissionable);
        self
    }

    pub fn matches(&self, advert: &ControllerAdvert) -> bool {
        self.name.as_ref().map_or(true, |n| *n == advert.name)
            && self
                .name_prefix
                .as_ref()
                .map_or(true, |p| advert.name.starts_with(p.as_str()))
            && self.mac.map_or(true, |m| m == advert.mac)
            && self.network.map_or(true, |n| n == advert.network)
            && self
                .fw_version
                .as_ref()
                .map_or(true, |v| *v == advert.fw_version)
            && self.product.map_or(true, |p| p == advert.product_code)
            && self
                .commissionable
                .map_or(true, |c| c == advert.commissionable)
    }
}

/// Alternatives, OR-ed together.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Criteria(pub Vec<ControllerCriteria>);

impl Criteria {
    /// Accept any controller.
    pub fn any() -> Self {
        Self(Vec::new())
    }

    pub fn alternatives(alternatives: Vec<ControllerCriteria>) -> Self {
        Self(alternatives)
    }

    pub fn matches(&self, advert: &ControllerAdvert) -> bool {
        self.0.is_empty() || self.0.iter().any(|c| c.matches(advert))
    }

    /// Narrow every alternative to one MAC address.
    pub fn narrowed_to(&self, mac: [u8; 6]) -> Self {
        if self.0.is_empty() {
            return ControllerCriteria::default().mac(mac).into();
        }
        Self(self.0.iter().cloned().map(|c| c.mac(mac)).collect())
    }
}

impl From<ControllerCriteria> for Criteria {
    fn from(single: ControllerCriteria) -> Self {
        Self(vec![single])
    }
}

/// Pick the strongest advert accepted by `criteria`.
pub fn strongest<'a>(
    adverts: &'a [ControllerAdvert],
    criteria: &Criteria,
) -> Option<&'a ControllerAdvert> {
    adverts
        .iter()
        .filter(|a| criteria.matches(a))
        .max_by_key(|a| a.rssi)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advert(name: &str, mac: u8, rssi: i16) -> ControllerAdvert {
        ControllerAdvert {
            name: name.into(),
            mac: [mac; 6],
            rssi,
            ..Default::default()
        }
    }

    #[test]
    fn empty_criteria_accept_anything() {
        assert!(Criteria::any().matches(&advert("porch", 1, -60)));
    }

    #[test]
    fn predicates_within_one_set_are_and_ed() {
        let c = ControllerCriteria::default().name_prefix("po").mac([2; 6]);
        assert!(!c.matches(&advert("porch", 1, -60)));
        assert!(c.matches(&advert("porch", 2, -60)));
    }

    #[test]
    fn alternatives_are_or_ed() {
        let criteria = Criteria::alternatives(vec![
            ControllerCriteria::default().name("garden"),
            ControllerCriteria::default().name("porch"),
        ]);
        assert!(criteria.matches(&advert("porch", 1, -60)));
        assert!(!criteria.matches(&advert("attic", 1, -60)));
    }

    #[test]
    fn strongest_ignores_non_matching() {
        let adverts = vec![
            advert("attic", 1, -30),
            advert("porch", 2, -70),
            advert("porch", 3, -50),
        ];
        let criteria: Criteria = ControllerCriteria::default().name("porch").into();
        assert_eq!(strongest(&adverts, &criteria).unwrap().mac, [3; 6]);
    }

    #[test]
    fn narrowing_keeps_other_predicates() {
        let criteria: Criteria = ControllerCriteria::default().name("porch").into();
        let narrowed = criteria.narrowed_to([9; 6]);
        assert!(narrowed.matches(&advert("porch", 9, -80)));
        assert!(!narrowed.matches(&advert("porch", 8, -80)));
        assert!(Criteria::any().narrowed_to([9; 6]).matches(&advert("x", 9, 0)));
    }
}
