//! JSON output of model instances.

use serde_json::{Map, Value as Json};
use tablebind_core::{
    AnyModel, AnyModelRef, Model, ModelConfig, ModelRef, Original, RelationState, Result,
};

use crate::Session;

impl Session {
    /// Serialize `model` into a JSON object.
    ///
    /// Relations are written as ids: a single id (or null) for to-one
    /// relations, a list for collections. A relation that was never loaded is
    /// written from its recorded baseline, so serializing never queries.
    pub fn to_json<M: Model>(&self, model: &ModelRef<M>) -> Result<Map<String, Json>> {
        self.serialize_any(&model.erase())
    }

    pub fn serialize_any(&self, model: &AnyModelRef) -> Result<Map<String, Json>> {
        let config = self.config_of(model.model_type())?;
        let instance = model.borrow();
        let mut data = serialize_fields(&*instance, &config)?;
        for method in &config.hooks.extends_serialization {
            instance.extend_serialization(method, &mut data)?;
        }
        Ok(data)
    }
}

fn serialize_fields(model: &dyn AnyModel, config: &ModelConfig) -> Result<Map<String, Json>> {
    let mut data = Map::new();
    for property in &config.properties {
        if property.skip_serializing {
            continue;
        }
        let Some(slot) = model.field(&property.name) else {
            continue;
        };
        let name = property.serialized_name().to_string();

        if let Some(relation) = slot.as_relation() {
            let value = match relation.state() {
                RelationState::One(id) => id.map_or(Json::Null, Json::from),
                RelationState::Many(ids) => Json::from(ids),
                RelationState::NotLoaded => match model.state().original(&property.name) {
                    Some(Original::Id(id)) => id.map_or(Json::Null, Json::from),
                    Some(Original::Ids(ids)) => Json::from(ids.clone()),
                    Some(Original::Value(value)) => value.to_json(),
                    None => Json::Null,
                },
            };
            data.insert(name, value);
        } else if let Some(extend) = slot.as_extend() {
            let Some(columns) = extend.current()? else {
                continue;
            };
            let object = columns
                .into_iter()
                .map(|(column, value)| (column, value.to_json()))
                .collect();
            data.insert(name, Json::Object(object));
        } else {
            let value = slot.to_value().map_or(Json::Null, |v| v.to_json());
            data.insert(name, value);
        }
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tablebind_core::{Extend, ModelRef, ModelState, Related, RelatedMany, Result};
    use tablebind_macros::Model;

    use crate::Session;
    use crate::testing::{MockConnection, ModelA, ModelB, Money, a_row};

    #[derive(Debug, Default, Model)]
    #[orm(table = "profiles", extends_serialization = "add_summary")]
    struct Profile {
        state: ModelState,
        profile_id: Option<i64>,
        #[orm(alias = "displayName")]
        display_name: String,
        #[orm(skip_serializing)]
        secret: String,
        #[orm(no_db)]
        visits: i64,
        price: Extend<Money>,
    }

    impl Profile {
        fn add_summary(&self, data: &mut serde_json::Map<String, serde_json::Value>) -> Result<()> {
            let summary = format!("{} ({})", self.display_name, self.visits);
            data.insert("summary".into(), json!(summary));
            Ok(())
        }
    }

    #[test]
    fn aliases_skips_and_post_processing() {
        let session = Session::new(MockConnection::new());
        let profile = ModelRef::new(Profile {
            display_name: "Ada".into(),
            secret: "hunter2".into(),
            visits: 3,
            price: Extend::new(Money {
                amount: 5,
                currency: "EUR".into(),
            }),
            ..Profile::default()
        });
        let data = session.to_json(&profile).unwrap();
        assert_eq!(
            serde_json::Value::Object(data),
            json!({
                "profile_id": null,
                "displayName": "Ada",
                "visits": 3,
                "price": {"amount": 5, "currency": "EUR"},
                "summary": "Ada (3)",
            })
        );
    }

    #[test]
    fn relations_serialize_as_ids() {
        let conn = MockConnection::new();
        conn.push_rows(vec![a_row(1, "owner")]);
        let session = Session::new(conn);
        let a = session.get::<ModelA>(1).unwrap();

        let b = ModelRef::new(ModelB {
            description: "child".into(),
            parent: Related::new(a.clone()),
            ..ModelB::default()
        });
        let data = session.to_json(&b).unwrap();
        assert_eq!(data["parent"], json!(1));
        assert_eq!(data["description"], json!("child"));

        // unloaded collection falls back to its baseline, which is unset here
        let data = session.to_json(&a).unwrap();
        assert_eq!(data["children"], serde_json::Value::Null);

        b.borrow_mut().state.set_id(Some(8));
        a.borrow_mut().children = RelatedMany::new(Default::default());
        a.borrow_mut().children.add(b).unwrap();
        let data = session.to_json(&a).unwrap();
        assert_eq!(data["children"], json!([8]));
        assert_eq!(data["model_a_id"], json!(1));
    }
}
