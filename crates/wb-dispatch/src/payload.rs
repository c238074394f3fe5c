//! Template send payloads.
//!
//! A [`TemplatePlan`] is compiled once per batch: the template definition is
//! validated against the broadcast's media and carousel inputs, and every
//! placeholder that needs a value is recorded. Rendering a recipient then only
//! looks values up, so a batch-level mistake (wrong media type, card count
//! mismatch) fails before any message is sent while a missing per-recipient
//! value only fails that recipient.

use serde_json::{json, Value};

use wb_common::template::{validate_components, ComponentType, HeaderFormat, TemplateComponent};
use wb_common::{CarouselCardInput, MediaRef, MediaType, Template, TemplateError, Variables};

#[derive(Debug, Clone)]
enum HeaderPlan {
    Text(Vec<String>),
    Media(MediaRef),
}

#[derive(Debug, Clone)]
struct UrlButtonPlan {
    index: usize,
    placeholders: Vec<String>,
}

#[derive(Debug, Clone)]
struct CardPlan {
    media: MediaRef,
    body: Vec<String>,
    buttons: Vec<UrlButtonPlan>,
    variables: Variables,
}

/// Validated, recipient-independent send plan for one template
#[derive(Debug, Clone)]
pub struct TemplatePlan {
    template_id: String,
    name: String,
    language: String,
    header: Option<HeaderPlan>,
    body: Vec<String>,
    buttons: Vec<UrlButtonPlan>,
    cards: Vec<CardPlan>,
}

impl TemplatePlan {
    pub fn compile(
        template: &Template,
        media: Option<&MediaRef>,
        carousel: &[CarouselCardInput],
    ) -> Result<Self, TemplateError> {
        validate_components(&template.components)?;

        let mut plan = TemplatePlan {
            template_id: template.id.clone(),
            name: template.name.clone(),
            language: template.language.clone(),
            header: None,
            body: Vec::new(),
            buttons: Vec::new(),
            cards: Vec::new(),
        };
        let mut has_carousel = false;

        for component in &template.components {
            match component.kind()? {
                ComponentType::Header => {
                    plan.header = Some(header_plan(component, media, "header")?);
                }
                ComponentType::Body => plan.body = component.placeholders(),
                ComponentType::Buttons => plan.buttons = url_buttons(component),
                ComponentType::Carousel => {
                    has_carousel = true;
                    plan.cards = card_plans(component, carousel)?;
                }
                ComponentType::Footer => {}
            }
        }

        if !has_carousel && !carousel.is_empty() {
            return Err(TemplateError::CarouselConfiguration(format!(
                "template '{}' has no carousel but {} cards were supplied",
                template.name,
                carousel.len()
            )));
        }

        Ok(plan)
    }

    pub fn template_id(&self) -> &str {
        &self.template_id
    }

    pub fn template_name(&self) -> &str {
        &self.name
    }

    /// Build the send payload for one recipient
    pub fn render(&self, to: &str, variables: &Variables) -> Result<Value, TemplateError> {
        let mut components = Vec::new();

        match &self.header {
            Some(HeaderPlan::Text(names)) if !names.is_empty() => {
                components.push(json!({
                    "type": "header",
                    "parameters": text_parameters(names, &[variables], "header")?,
                }));
            }
            Some(HeaderPlan::Media(media)) => {
                components.push(json!({
                    "type": "header",
                    "parameters": [media_parameter(media)],
                }));
            }
            _ => {}
        }

        if !self.body.is_empty() {
            components.push(json!({
                "type": "body",
                "parameters": text_parameters(&self.body, &[variables], "body")?,
            }));
        }

        for button in &self.buttons {
            components.push(button_component(button, &[variables])?);
        }

        if !self.cards.is_empty() {
            let mut cards = Vec::with_capacity(self.cards.len());
            for (index, card) in self.cards.iter().enumerate() {
                let scopes = [&card.variables, variables];
                let context = format!("carousel card {}", index);

                let mut card_components = vec![json!({
                    "type": "header",
                    "parameters": [media_parameter(&card.media)],
                })];
                if !card.body.is_empty() {
                    card_components.push(json!({
                        "type": "body",
                        "parameters": text_parameters(&card.body, &scopes, &context)?,
                    }));
                }
                for button in &card.buttons {
                    card_components.push(button_component(button, &scopes)?);
                }

                cards.push(json!({
                    "card_index": index,
                    "components": card_components,
                }));
            }
            components.push(json!({ "type": "carousel", "cards": cards }));
        }

        let mut template = json!({
            "name": self.name,
            "language": { "code": self.language },
        });
        if !components.is_empty() {
            template["components"] = Value::Array(components);
        }

        Ok(json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "template",
            "template": template,
        }))
    }
}

fn header_plan(
    component: &TemplateComponent,
    media: Option<&MediaRef>,
    context: &str,
) -> Result<HeaderPlan, TemplateError> {
    match component.header_format()? {
        HeaderFormat::Text => Ok(HeaderPlan::Text(component.placeholders())),
        HeaderFormat::Media(expected) => {
            let media = media.ok_or_else(|| {
                TemplateError::MissingMedia(format!("{} requires {} media", context, expected))
            })?;
            check_media(expected, media, context)?;
            Ok(HeaderPlan::Media(media.clone()))
        }
    }
}

fn check_media(expected: MediaType, media: &MediaRef, context: &str) -> Result<(), TemplateError> {
    if media.media_type != expected {
        return Err(TemplateError::InvalidMediaType(format!(
            "{} expects {}, got {}",
            context, expected, media.media_type
        )));
    }
    if media.url.trim().is_empty() {
        return Err(TemplateError::MissingMedia(format!("{} media url is empty", context)));
    }
    Ok(())
}

fn url_buttons(component: &TemplateComponent) -> Vec<UrlButtonPlan> {
    component
        .buttons
        .iter()
        .enumerate()
        .filter(|(_, button)| button.is_url())
        .filter_map(|(index, button)| {
            let placeholders = button
                .url
                .as_deref()
                .map(wb_common::template::placeholders)
                .unwrap_or_default();
            (!placeholders.is_empty()).then_some(UrlButtonPlan {
                index,
                placeholders,
            })
        })
        .collect()
}

fn card_plans(
    component: &TemplateComponent,
    inputs: &[CarouselCardInput],
) -> Result<Vec<CardPlan>, TemplateError> {
    if inputs.len() != component.cards.len() {
        return Err(TemplateError::CarouselConfiguration(format!(
            "template defines {} cards but {} were supplied",
            component.cards.len(),
            inputs.len()
        )));
    }

    let mut plans = Vec::with_capacity(inputs.len());
    for (index, (card, input)) in component.cards.iter().zip(inputs).enumerate() {
        let context = format!("carousel card {}", index);
        let mut media = None;
        let mut body = Vec::new();
        let mut buttons = Vec::new();

        for inner in &card.components {
            match inner.kind()? {
                ComponentType::Header => {
                    let plan = header_plan(inner, input.media.as_ref(), &context)?;
                    if let HeaderPlan::Media(m) = plan {
                        media = Some(m);
                    }
                }
                ComponentType::Body => body = inner.placeholders(),
                ComponentType::Buttons => buttons = url_buttons(inner),
                _ => {}
            }
        }

        let media = media.ok_or_else(|| {
            TemplateError::CarouselConfiguration(format!("{} has no media header", context))
        })?;
        plans.push(CardPlan {
            media,
            body,
            buttons,
            variables: input.variables.clone(),
        });
    }
    Ok(plans)
}

fn lookup<'a>(
    name: &str,
    scopes: &[&'a Variables],
    context: &str,
) -> Result<&'a str, TemplateError> {
    scopes
        .iter()
        .copied()
        .find_map(|vars| vars.get(name))
        .map(String::as_str)
        .ok_or_else(|| TemplateError::MissingVariable {
            component: context.to_string(),
            placeholder: name.to_string(),
        })
}

fn text_parameters(
    names: &[String],
    scopes: &[&Variables],
    context: &str,
) -> Result<Vec<Value>, TemplateError> {
    names
        .iter()
        .map(|name| {
            let value = lookup(name, scopes, context)?;
            let mut param = json!({ "type": "text", "text": value });
            // Named placeholders are matched by name, positional ones by order
            if !name.chars().all(|c| c.is_ascii_digit()) {
                param["parameter_name"] = Value::String(name.clone());
            }
            Ok(param)
        })
        .collect()
}

fn button_component(button: &UrlButtonPlan, scopes: &[&Variables]) -> Result<Value, TemplateError> {
    let context = format!("button {}", button.index);
    Ok(json!({
        "type": "button",
        "sub_type": "url",
        "index": button.index.to_string(),
        "parameters": text_parameters(&button.placeholders, scopes, &context)?,
    }))
}

fn media_parameter(media: &MediaRef) -> Value {
    let kind = media.media_type.parameter_name();
    let mut param = json!({ "type": kind });
    param[kind] = json!({ "link": media.url });
    param
}

#[cfg(test)]
mod tests {
    use super::*;
    use wb_common::template::{CarouselCard, TemplateButton};
    use wb_common::TemplateCategory;

    fn component(kind: &str, format: Option<&str>, text: Option<&str>) -> TemplateComponent {
        TemplateComponent {
            component_type: kind.to_string(),
            format: format.map(String::from),
            text: text.map(String::from),
            buttons: vec![],
            cards: vec![],
        }
    }

    fn template(components: Vec<TemplateComponent>) -> Template {
        Template::new("acc-1", "order_update", "en_US", TemplateCategory::Utility, components)
    }

    fn vars(pairs: &[(&str, &str)]) -> Variables {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_body_only_payload() {
        let plan = TemplatePlan::compile(
            &template(vec![component("BODY", None, Some("Hi {{1}}, order {{2}} shipped"))]),
            None,
            &[],
        )
        .unwrap();

        let payload = plan
            .render("14155550100", &vars(&[("1", "Ada"), ("2", "A-17")]))
            .unwrap();

        assert_eq!(payload["messaging_product"], "whatsapp");
        assert_eq!(payload["to"], "14155550100");
        assert_eq!(payload["template"]["name"], "order_update");
        assert_eq!(payload["template"]["language"]["code"], "en_US");
        let body = &payload["template"]["components"][0];
        assert_eq!(body["type"], "body");
        assert_eq!(body["parameters"][0]["text"], "Ada");
        assert_eq!(body["parameters"][1]["text"], "A-17");
        assert!(body["parameters"][0].get("parameter_name").is_none());
    }

    #[test]
    fn test_repeated_placeholder_sends_one_parameter() {
        let plan = TemplatePlan::compile(
            &template(vec![component("BODY", None, Some("Hi {{1}}, see you soon {{1}}"))]),
            None,
            &[],
        )
        .unwrap();
        let payload = plan.render("14155550100", &vars(&[("1", "Ada")])).unwrap();
        let params = payload["template"]["components"][0]["parameters"].as_array().unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0]["text"], "Ada");
    }

    #[test]
    fn test_named_placeholder_carries_name() {
        let plan = TemplatePlan::compile(
            &template(vec![component("BODY", None, Some("Hello {{first_name}}"))]),
            None,
            &[],
        )
        .unwrap();
        let payload = plan.render("14155550100", &vars(&[("first_name", "Lin")])).unwrap();
        let param = &payload["template"]["components"][0]["parameters"][0];
        assert_eq!(param["parameter_name"], "first_name");
        assert_eq!(param["text"], "Lin");
    }

    #[test]
    fn test_missing_variable_fails_render_only() {
        let plan = TemplatePlan::compile(
            &template(vec![component("BODY", None, Some("Hi {{1}}"))]),
            None,
            &[],
        )
        .unwrap();
        let err = plan.render("14155550100", &Variables::new()).unwrap_err();
        assert_eq!(
            err,
            TemplateError::MissingVariable {
                component: "body".to_string(),
                placeholder: "1".to_string()
            }
        );
    }

    #[test]
    fn test_media_header_required_and_typed() {
        let definition = template(vec![
            component("HEADER", Some("IMAGE"), None),
            component("BODY", None, Some("New arrivals")),
        ]);

        assert!(matches!(
            TemplatePlan::compile(&definition, None, &[]),
            Err(TemplateError::MissingMedia(_))
        ));

        let video = MediaRef {
            media_type: MediaType::Video,
            url: "https://cdn.test/v.mp4".to_string(),
        };
        assert!(matches!(
            TemplatePlan::compile(&definition, Some(&video), &[]),
            Err(TemplateError::InvalidMediaType(_))
        ));

        let image = MediaRef {
            media_type: MediaType::Image,
            url: "https://cdn.test/a.png".to_string(),
        };
        let plan = TemplatePlan::compile(&definition, Some(&image), &[]).unwrap();
        let payload = plan.render("14155550100", &Variables::new()).unwrap();
        let header = &payload["template"]["components"][0];
        assert_eq!(header["parameters"][0]["type"], "image");
        assert_eq!(header["parameters"][0]["image"]["link"], "https://cdn.test/a.png");
    }

    #[test]
    fn test_url_button_parameter() {
        let mut buttons = component("BUTTONS", None, None);
        buttons.buttons = vec![
            TemplateButton {
                button_type: "QUICK_REPLY".to_string(),
                text: "Stop".to_string(),
                url: None,
            },
            TemplateButton {
                button_type: "URL".to_string(),
                text: "Track".to_string(),
                url: Some("https://shop.test/track/{{1}}".to_string()),
            },
        ];
        let plan = TemplatePlan::compile(
            &template(vec![component("BODY", None, Some("Shipped")), buttons]),
            None,
            &[],
        )
        .unwrap();

        let payload = plan.render("14155550100", &vars(&[("1", "A-17")])).unwrap();
        let button = &payload["template"]["components"][0];
        assert_eq!(button["type"], "button");
        assert_eq!(button["sub_type"], "url");
        assert_eq!(button["index"], "1");
        assert_eq!(button["parameters"][0]["text"], "A-17");
    }

    fn carousel_template(cards: usize) -> Template {
        let card = CarouselCard {
            components: vec![
                component("HEADER", Some("IMAGE"), None),
                component("BODY", None, Some("Only {{price}}")),
            ],
        };
        let mut carousel = component("CAROUSEL", None, None);
        carousel.cards = vec![card; cards];
        template(vec![component("BODY", None, Some("Picks for {{1}}")), carousel])
    }

    fn card_input(url: &str, price: &str) -> CarouselCardInput {
        CarouselCardInput {
            media: Some(MediaRef {
                media_type: MediaType::Image,
                url: url.to_string(),
            }),
            variables: vars(&[("price", price)]),
        }
    }

    #[test]
    fn test_carousel_cards_rendered() {
        let inputs = vec![
            card_input("https://cdn.test/1.png", "$5"),
            card_input("https://cdn.test/2.png", "$9"),
        ];
        let plan = TemplatePlan::compile(&carousel_template(2), None, &inputs).unwrap();
        let payload = plan.render("14155550100", &vars(&[("1", "Ada")])).unwrap();

        let components = payload["template"]["components"].as_array().unwrap();
        let carousel = &components[1];
        assert_eq!(carousel["type"], "carousel");
        assert_eq!(carousel["cards"][1]["card_index"], 1);
        assert_eq!(
            carousel["cards"][1]["components"][0]["parameters"][0]["image"]["link"],
            "https://cdn.test/2.png"
        );
        assert_eq!(carousel["cards"][1]["components"][1]["parameters"][0]["text"], "$9");
    }

    #[test]
    fn test_carousel_card_count_must_match() {
        let inputs = vec![card_input("https://cdn.test/1.png", "$5")];
        assert!(matches!(
            TemplatePlan::compile(&carousel_template(2), None, &inputs),
            Err(TemplateError::CarouselConfiguration(_))
        ));

        let plain = template(vec![component("BODY", None, Some("Hi"))]);
        assert!(matches!(
            TemplatePlan::compile(&plain, None, &inputs),
            Err(TemplateError::CarouselConfiguration(_))
        ));
    }
}
