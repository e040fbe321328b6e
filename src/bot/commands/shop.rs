//! Shop Discord commands - `products`, `buy`, `checkpayment`, `mypayments`
//! and `mypurchases`.
//!
//! Everything a buyer sees about their own payments is sent as an ephemeral
//! reply.

// Inner module to suppress missing_docs warnings for poise macro-generated code
mod inner {
    #![allow(missing_docs)]

    use crate::{
        bot::{
            BotData, handlers::autocomplete, purchase_status_line, reply_private,
            reply_private_embed,
        },
        core::{delivery, link, payment, product, store},
        errors::{Error, Result},
        models::{PaymentMethod, PaymentStatus, Purchase},
    };
    use poise::serenity_prelude as serenity;
    use tracing::instrument;

    /// Lists every product for sale.
    #[poise::command(slash_command, prefix_command)]
    pub async fn products(ctx: poise::Context<'_, BotData, Error>) -> Result<()> {
        let products = product::list_products(&ctx.data().database).await?;
        if products.is_empty() {
            ctx.say("The shop is empty right now.").await?;
            return Ok(());
        }

        let fields: Vec<(String, String, bool)> = products
            .iter()
            .take(25)
            .map(|p| {
                let stock = p
                    .stock
                    .map_or_else(|| "unlimited".to_string(), |s| s.to_string());
                let mut value = format!(
                    "**R$ {:.2}** • {} • stock: {stock}\nid: `{}`",
                    p.price,
                    p.duration_label(),
                    p.id
                );
                if !p.description.is_empty() {
                    value = format!("{}\n{value}", p.description);
                }
                (p.name.clone(), value, false)
            })
            .collect();

        let embed = serenity::CreateEmbed::default()
            .title("🛒 Products")
            .description("Use `/buy <product>` to purchase.")
            .color(0x0058_65F2)
            .fields(fields);
        ctx.send(poise::CreateReply::default().embed(embed)).await?;
        Ok(())
    }

    /// Creates a payment for a product.
    ///
    /// PIX returns a copy-and-paste code, card returns a checkout link. The
    /// product is delivered automatically once the payment is approved.
    #[poise::command(slash_command, prefix_command)]
    #[instrument(skip(ctx), fields(user_id = %ctx.author().id))]
    pub async fn buy(
        ctx: poise::Context<'_, BotData, Error>,
        #[description = "Product to buy"]
        #[autocomplete = "autocomplete::autocomplete_product_id"]
        product_id: String,
        #[description = "Payment method (defaults to PIX)"] method: Option<PaymentMethod>,
        #[description = "E-mail for the payment receipt"] email: Option<String>,
    ) -> Result<()> {
        let data = ctx.data();
        let db = &data.database;
        let method = method.unwrap_or(PaymentMethod::Pix);
        let user_id = ctx.author().id.to_string();

        let Some(product) = product::get_product(db, &product_id).await? else {
            reply_private(ctx, format!("❌ Product `{product_id}` not found. See `/products`.")).await?;
            return Ok(());
        };

        ctx.defer_ephemeral().await?;
        let buyer = payment::Buyer {
            user_id: user_id.clone(),
            username: ctx.author().name.clone(),
            email,
        };
        let receipt = match payment::create_charge(
            db,
            data.engine.gateway(),
            &product,
            &buyer,
            method,
            &data.charge_options(),
        )
        .await
        {
            Ok(receipt) => receipt,
            Err(
                e @ (Error::OutOfStock { .. }
                | Error::Config { .. }
                | Error::Gateway { .. }
                | Error::InvalidAmount { .. }),
            ) => {
                tracing::warn!("Charge not created: {}", e);
                reply_private(ctx, format!("❌ {}", e.user_message())).await?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let payment = &receipt.payment;

        let mut embed = serenity::CreateEmbed::default()
            .title(format!("🛒 {}", payment.product_name))
            .color(0x0000_B1EA)
            .field("Payment ID", format!("`{}`", payment.id), false)
            .field("Amount", format!("R$ {:.2}", payment.amount), true)
            .field("Method", method.as_str().to_uppercase(), true);
        if let Some(expires) = payment.expiration_date {
            embed = embed.field("Expires", format!("<t:{}:R>", expires.timestamp()), true);
        }
        if let Some(code) = &payment.qr_code {
            embed = embed.field("PIX copy and paste", format!("```{code}```"), false);
        }
        if let Some(url) = &payment.pay_url {
            embed = embed.url(url).field("Pay here", url, false);
        }
        if link::get_link(db, &user_id).await?.is_none() {
            embed = embed.field(
                "⚠️ Game account not linked",
                "Use `/link <steamid>` so the product can be delivered after payment.",
                false,
            );
        }
        embed = embed.footer(serenity::CreateEmbedFooter::new(format!(
            "Delivery starts automatically. If it does not, use /checkpayment {}",
            payment.id
        )));

        reply_private_embed(ctx, embed).await
    }

    /// Checks a payment at the processor and delivers it when approved.
    #[poise::command(slash_command, prefix_command)]
    #[instrument(skip(ctx), fields(user_id = %ctx.author().id))]
    pub async fn checkpayment(
        ctx: poise::Context<'_, BotData, Error>,
        #[description = "Payment ID shown by /buy"] payment_id: String,
    ) -> Result<()> {
        let data = ctx.data();
        let db = &data.database;
        let user_id = ctx.author().id.to_string();

        let Some(found) = payment::get_payment(db, payment_id.trim())
            .await?
            .filter(|p| p.user_id == user_id)
        else {
            reply_private(ctx, format!("❌ Payment `{payment_id}` was not found.")).await?;
            return Ok(());
        };

        ctx.defer_ephemeral().await?;
        let mut notes = Vec::new();
        if found.status == PaymentStatus::Pending {
            if let Err(e) = data.engine.sync_payment_status(&found.id).await {
                tracing::warn!(payment_id = %found.id, "Manual check failed: {}", e);
                notes.push(format!("⚠️ {}", e.user_message()));
            }
        }
        let pending_delivery = store::get::<Purchase, _>(db, &found.id)
            .await?
            .is_some_and(|p| !p.delivered);
        if pending_delivery {
            if let Err(e) = data.engine.deliver_product(&found.id).await {
                notes.push(format!("⚠️ {}", e.user_message()));
            }
        }

        let current = payment::require_payment(db, &found.id).await?;
        let purchase = store::get::<Purchase, _>(db, &found.id).await?;
        let mut embed = serenity::CreateEmbed::default()
            .title(format!("{} Payment `{}`", current.status.emoji(), current.id))
            .color(0x0058_65F2)
            .field("Product", &current.product_name, true)
            .field("Amount", format!("R$ {:.2}", current.amount), true)
            .field("Status", current.status.as_str(), true);
        if let Some(purchase) = &purchase {
            embed = embed.field("Purchase", purchase_status_line(purchase), false);
        }
        if !notes.is_empty() {
            embed = embed.field("Notes", notes.join("\n"), false);
        }
        reply_private_embed(ctx, embed).await
    }

    /// Shows your ten most recent payments.
    #[poise::command(slash_command, prefix_command)]
    pub async fn mypayments(ctx: poise::Context<'_, BotData, Error>) -> Result<()> {
        let user_id = ctx.author().id.to_string();
        let payments = payment::list_user_payments(&ctx.data().database, &user_id).await?;
        if payments.is_empty() {
            reply_private(ctx, "You have no payments yet. See `/products`.").await?;
            return Ok(());
        }

        let lines: Vec<String> = payments
            .iter()
            .take(10)
            .map(|p| {
                format!(
                    "{} `{}` **{}** R$ {:.2} • <t:{}:d>",
                    p.status.emoji(),
                    p.id,
                    p.product_name,
                    p.amount,
                    p.date.timestamp()
                )
            })
            .collect();
        let embed = serenity::CreateEmbed::default()
            .title("💳 Your payments")
            .description(lines.join("\n"))
            .color(0x0058_65F2);
        reply_private_embed(ctx, embed).await
    }

    /// Shows your purchases and when they expire.
    #[poise::command(slash_command, prefix_command)]
    pub async fn mypurchases(ctx: poise::Context<'_, BotData, Error>) -> Result<()> {
        let user_id = ctx.author().id.to_string();
        let purchases = delivery::list_purchases(&ctx.data().database, Some(&user_id)).await?;
        if purchases.is_empty() {
            reply_private(ctx, "You have no purchases yet.").await?;
            return Ok(());
        }

        let fields: Vec<(String, String, bool)> = purchases
            .iter()
            .take(20)
            .map(|p| {
                (
                    p.payment.product_name.clone(),
                    format!("{}\npayment `{}`", purchase_status_line(p), p.id()),
                    false,
                )
            })
            .collect();
        let embed = serenity::CreateEmbed::default()
            .title("📦 Your purchases")
            .color(0x0058_65F2)
            .fields(fields);
        reply_private_embed(ctx, embed).await
    }
}

// Re-export all commands
pub use inner::*;
